//! Room actor: one task per room driving a `Simulation` on a fixed tick

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::util::time::{tick_duration, unix_secs, TICK_MS};
use crate::ws::protocol::{Identity, RoomClientMsg, RoomServerMsg, SeatReservation};

use super::content::ContentError;
use super::seats::{ReservationError, ReservationSigner, SeatBook, SeatClaims};
use super::sim::{build_world, JoinAck, JoinRejection, RoomResult, Simulation};

/// Default number of seats in a room
pub const DEFAULT_MAX_PLAYERS: usize = 3;
/// Rooms with no connected player for this long are abandoned
pub const DEFAULT_EMPTY_TIMEOUT: Duration = Duration::from_secs(30);

/// Commands accepted by a room, drained at the start of each tick
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        identity: Identity,
        display_name: String,
        reply: oneshot::Sender<Result<JoinAck, JoinRejection>>,
    },
    Input {
        identity: Identity,
        msg: RoomClientMsg,
    },
    Leave {
        identity: Identity,
    },
}

/// Who a room message is meant for
#[derive(Debug, Clone, PartialEq)]
pub enum Audience {
    All,
    Only(Identity),
}

#[derive(Debug, Clone)]
pub struct RoomEnvelope {
    pub audience: Audience,
    pub msg: RoomServerMsg,
}

impl RoomEnvelope {
    pub fn is_for(&self, identity: &Identity) -> bool {
        match &self.audience {
            Audience::All => true,
            Audience::Only(target) => target == identity,
        }
    }
}

/// Parameters for a new room
#[derive(Debug, Clone)]
pub struct RoomOptions {
    /// Squad members admitted to a locked room; `None` admits anyone
    pub allow_list: Option<HashSet<Identity>>,
    pub max_players: usize,
    /// Mission difficulty; `None` runs a survival room
    pub difficulty: Option<u8>,
    pub seed: Option<u64>,
    pub empty_timeout: Duration,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            allow_list: None,
            max_players: DEFAULT_MAX_PLAYERS,
            difficulty: None,
            seed: None,
            empty_timeout: DEFAULT_EMPTY_TIMEOUT,
        }
    }
}

impl RoomOptions {
    /// Locked room for exactly these members
    pub fn for_squad(members: &[Identity], difficulty: Option<u8>) -> Self {
        Self {
            allow_list: Some(members.iter().cloned().collect()),
            max_players: members.len().max(1),
            difficulty,
            ..Self::default()
        }
    }
}

/// Final per-player line of a finished room
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerOutcome {
    pub identity: Identity,
    pub display_name: String,
    pub score: u32,
    pub kills: u32,
    pub survived: bool,
}

/// Summary handed to the history recorder once a room task ends
#[derive(Debug, Clone)]
pub struct RoomOutcome {
    pub room_id: Uuid,
    /// `None` for survival rooms
    pub mission_id: Option<String>,
    pub difficulty: Option<u8>,
    pub result: RoomResult,
    pub ticks: u64,
    pub players: Vec<PlayerOutcome>,
}

impl RoomOutcome {
    pub fn duration_ms(&self) -> u64 {
        self.ticks * TICK_MS
    }
}

/// Cloneable handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    /// Mission tier; `None` for a survival room
    pub difficulty: Option<u8>,
    command_tx: mpsc::Sender<RoomCommand>,
    events_tx: broadcast::Sender<RoomEnvelope>,
    seats: Arc<Mutex<SeatBook>>,
    player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    /// Connected players, refreshed every tick
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEnvelope> {
        self.events_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed() || self.seats.lock().is_closed()
    }

    /// Ask the room to admit `identity`; answered on the next tick
    pub async fn join(
        &self,
        identity: Identity,
        display_name: String,
    ) -> Result<JoinAck, JoinRejection> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(RoomCommand::Join {
                identity,
                display_name,
                reply,
            })
            .await
            .map_err(|_| JoinRejection::RoomClosed)?;
        rx.await.map_err(|_| JoinRejection::RoomClosed)?
    }

    /// Queue one client frame. Returns false once the room is gone.
    pub async fn send_input(&self, identity: Identity, msg: RoomClientMsg) -> bool {
        self.command_tx
            .send(RoomCommand::Input { identity, msg })
            .await
            .is_ok()
    }

    pub async fn leave(&self, identity: Identity) {
        let _ = self.command_tx.send(RoomCommand::Leave { identity }).await;
    }

    /// Reserve one seat per identity under a single lock and sign a token
    /// for each. Results line up with `identities`.
    pub fn reserve_seats(
        &self,
        signer: &ReservationSigner,
        identities: &[Identity],
        ttl: Duration,
    ) -> Vec<(Identity, Result<SeatReservation, ReservationError>)> {
        let seat_ids = self.seats.lock().reserve_all(identities);
        let expires_at = unix_secs() + ttl.as_secs();

        identities
            .iter()
            .zip(seat_ids)
            .map(|(identity, seat)| {
                let reservation = seat.and_then(|seat_id| {
                    let claims = SeatClaims {
                        room_id: self.id,
                        identity: identity.clone(),
                        seat_id,
                        exp: expires_at,
                    };
                    Ok(SeatReservation {
                        room_id: self.id,
                        token: signer.sign(&claims)?,
                        expires_at,
                    })
                });
                (identity.clone(), reservation)
            })
            .collect()
    }

    /// Consume the seat named by verified claims
    pub fn redeem_seat(&self, claims: &SeatClaims) -> Result<(), ReservationError> {
        if claims.room_id != self.id {
            return Err(ReservationError::InvalidToken);
        }
        self.seats.lock().redeem(claims.seat_id, &claims.identity)
    }
}

/// The room task state
pub struct Room {
    id: Uuid,
    sim: Simulation,
    difficulty: Option<u8>,
    command_rx: mpsc::Receiver<RoomCommand>,
    events_tx: broadcast::Sender<RoomEnvelope>,
    seats: Arc<Mutex<SeatBook>>,
    player_count: Arc<AtomicUsize>,
    empty_timeout: Duration,
}

impl Room {
    pub fn new(id: Uuid, options: RoomOptions) -> Result<(Self, RoomHandle), ContentError> {
        let mut rng = match options.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let world = build_world(options.difficulty, &mut rng)?;
        let sim = Simulation::new(
            id,
            world,
            rng,
            options.allow_list.clone(),
            options.max_players,
        );

        let (command_tx, command_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(128);
        let seats = Arc::new(Mutex::new(SeatBook::new(
            options.allow_list,
            options.max_players,
        )));
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id,
            difficulty: options.difficulty,
            command_tx,
            events_tx: events_tx.clone(),
            seats: seats.clone(),
            player_count: player_count.clone(),
        };

        let room = Self {
            id,
            sim,
            difficulty: options.difficulty,
            command_rx,
            events_tx,
            seats,
            player_count,
            empty_timeout: options.empty_timeout,
        };

        Ok((room, handle))
    }

    /// Main room loop. Returns once the room is disposed.
    pub async fn run(mut self) -> RoomOutcome {
        info!(room_id = %self.id, difficulty = ?self.difficulty, "Room started");

        let mut ticker = interval(tick_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut empty_since = Some(Instant::now());

        loop {
            ticker.tick().await;

            self.drain_commands();

            let report = catch_unwind(AssertUnwindSafe(|| self.sim.tick(TICK_MS)));
            match report {
                Ok(report) => {
                    for msg in report.broadcasts {
                        self.publish(Audience::All, msg);
                    }
                }
                Err(_) => {
                    error!(room_id = %self.id, tick = self.sim.tick_count(), "Room tick panicked, skipping");
                }
            }

            if let Some(snapshot) = self.sim.snapshot() {
                self.publish(Audience::All, RoomServerMsg::Snapshot(snapshot));
            }

            let connected = self.sim.connected_count();
            self.player_count.store(connected, Ordering::Relaxed);

            if connected > 0 {
                empty_since = None;
            } else {
                let since = *empty_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.empty_timeout && self.sim.result().is_none() {
                    info!(room_id = %self.id, "No connected players, abandoning room");
                    self.sim.abandon();
                }
            }

            if self.sim.should_dispose() {
                break;
            }
        }

        self.seats.lock().close();
        self.player_count.store(0, Ordering::Relaxed);

        let outcome = self.outcome();
        info!(
            room_id = %self.id,
            result = outcome.result.as_str(),
            ticks = outcome.ticks,
            "Room disposed"
        );
        outcome
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                RoomCommand::Join {
                    identity,
                    display_name,
                    reply,
                } => {
                    let result = self.sim.on_join(&identity, &display_name);
                    match &result {
                        Ok(ack) => self.publish(
                            Audience::Only(identity.clone()),
                            RoomServerMsg::Joined {
                                room_id: self.id,
                                identity: identity.clone(),
                                tick: ack.tick,
                            },
                        ),
                        Err(rejection) => {
                            warn!(room_id = %self.id, identity = %identity, %rejection, "Join rejected");
                        }
                    }
                    if reply.send(result).is_err() {
                        debug!(room_id = %self.id, identity = %identity, "Join caller went away");
                    }
                }
                RoomCommand::Input { identity, msg } => {
                    if let Some(reply) = self.sim.on_input(&identity, msg) {
                        self.publish(Audience::Only(identity), reply);
                    }
                }
                RoomCommand::Leave { identity } => self.sim.on_leave(&identity),
            }
        }
    }

    fn publish(&self, audience: Audience, msg: RoomServerMsg) {
        // no subscribers is fine
        let _ = self.events_tx.send(RoomEnvelope { audience, msg });
    }

    fn outcome(&self) -> RoomOutcome {
        let world = self.sim.world();
        RoomOutcome {
            room_id: self.id,
            mission_id: world.config.as_ref().map(|c| c.id.clone()),
            difficulty: self.difficulty,
            result: self.sim.result().cloned().unwrap_or(RoomResult::Abandoned),
            ticks: self.sim.tick_count(),
            players: world
                .players
                .values()
                .map(|p| PlayerOutcome {
                    identity: p.identity.clone(),
                    display_name: p.display_name.clone(),
                    score: p.score,
                    kills: p.kills,
                    survived: p.alive,
                })
                .collect(),
        }
    }
}

/// Registry of running rooms
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<Uuid, RoomHandle>>,
    outcome_tx: Option<mpsc::UnboundedSender<RoomOutcome>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every finished room's outcome to `tx`
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<RoomOutcome>) -> Self {
        self.outcome_tx = Some(tx);
        self
    }

    /// Build a room and spawn its task. The room removes itself from the
    /// registry when it ends.
    pub fn create_room(&self, options: RoomOptions) -> Result<RoomHandle, ContentError> {
        let id = Uuid::new_v4();
        let (room, handle) = Room::new(id, options)?;
        self.rooms.insert(id, handle.clone());

        let rooms = self.rooms.clone();
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = room.run().await;
            rooms.remove(&id);
            if let Some(tx) = outcome_tx {
                if tx.send(outcome).is_err() {
                    warn!(room_id = %id, "Outcome receiver closed, result not recorded");
                }
            }
        });

        Ok(handle)
    }

    pub fn get(&self, id: &Uuid) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }
}
