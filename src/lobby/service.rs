//! Lobby service: squads, matchmaking and room hand-off over the lobby
//! socket

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::content::{ContentError, DifficultyTier};
use crate::game::{ReservationError, ReservationSigner, RoomOptions, RoomRegistry};
use crate::ws::protocol::{Identity, LobbyClientMsg, LobbyServerMsg, MatchmakingStatus};

use super::presence::{PresenceRegistry, PresenceSender};
use super::queue::{MatchmakingQueue, QueueDecision, DEFAULT_QUEUE_TIMEOUT};
use super::squads::{Outbox, SquadBook, SquadError};

/// Tunables for the lobby service
#[derive(Debug, Clone)]
pub struct LobbySettings {
    /// Difficulty used when a start request names none. Without one such
    /// starts, and every matchmade room, get a survival room.
    pub default_difficulty: Option<u8>,
    /// Lifetime of a seat reservation token
    pub reservation_ttl: Duration,
    pub matchmaking_interval: Duration,
    pub queue_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub empty_room_timeout: Duration,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            default_difficulty: None,
            reservation_ttl: Duration::from_secs(60),
            matchmaking_interval: Duration::from_millis(1000),
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            heartbeat_interval: Duration::from_secs(30),
            empty_room_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartMatchError {
    #[error(transparent)]
    Squad(#[from] SquadError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("Seat reservation failed for {failed} member(s)")]
    Reservation { failed: usize },
}

impl StartMatchError {
    pub fn code(&self) -> &'static str {
        match self {
            StartMatchError::Squad(e) => e.code(),
            StartMatchError::Content(_) => "invalid_difficulty",
            StartMatchError::Reservation { .. } => "reservation_failed",
        }
    }
}

/// Lobby-side services shared by every lobby socket
pub struct LobbyService {
    presence: Arc<PresenceRegistry>,
    squads: Mutex<SquadBook>,
    queue: AsyncMutex<MatchmakingQueue>,
    rooms: RoomRegistry,
    signer: Arc<ReservationSigner>,
    settings: LobbySettings,
}

impl LobbyService {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        rooms: RoomRegistry,
        signer: Arc<ReservationSigner>,
        settings: LobbySettings,
    ) -> Self {
        Self {
            presence,
            squads: Mutex::new(SquadBook::new()),
            queue: AsyncMutex::new(MatchmakingQueue::new(settings.queue_timeout)),
            rooms,
            signer,
            settings,
        }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn squad_count(&self) -> usize {
        self.squads.lock().len()
    }

    /// Register a lobby socket. Returns the connection id for `on_disconnect`.
    pub async fn on_connect(&self, identity: &Identity, display_name: &str, tx: PresenceSender) -> u64 {
        let conn_id = self.presence.connect(identity, display_name, tx).await;
        self.presence.send(
            identity,
            LobbyServerMsg::Registered {
                identity: identity.clone(),
            },
        );
        conn_id
    }

    /// Socket closed or evicted. A replaced session leaves squads and the
    /// queue alone.
    pub async fn on_disconnect(&self, identity: &Identity, conn_id: u64) {
        if !self.presence.disconnect(identity, conn_id).await {
            return;
        }
        let outbox = self
            .squads
            .lock()
            .leave(identity, Instant::now())
            .unwrap_or_default();
        self.dispatch(outbox);
        self.queue.lock().await.dequeue(identity);
    }

    /// Handle one message from a registered lobby socket
    pub async fn handle(&self, identity: &Identity, msg: LobbyClientMsg) {
        let display_name = self
            .presence
            .display_name(identity)
            .unwrap_or_else(|| identity.short());

        let result = match msg {
            LobbyClientMsg::Register { .. } => {
                self.reply_error(identity, "already_registered", "Socket is already registered");
                Ok(())
            }
            LobbyClientMsg::CreateSquad => {
                let created = self
                    .squads
                    .lock()
                    .create(identity, &display_name, Instant::now());
                created.map(|(_, outbox)| self.dispatch(outbox))
            }
            LobbyClientMsg::JoinSquad { squad_id } => {
                let joined = self
                    .squads
                    .lock()
                    .join(&squad_id, identity, &display_name, Instant::now());
                joined.map(|outbox| self.dispatch(outbox))
            }
            LobbyClientMsg::LeaveSquad => {
                let left = self.squads.lock().leave(identity, Instant::now());
                left.map(|outbox| self.dispatch(outbox))
            }
            LobbyClientMsg::SetReady { ready } => {
                let updated = self.squads.lock().set_ready(identity, ready, Instant::now());
                updated.map(|outbox| self.dispatch(outbox))
            }
            LobbyClientMsg::SendSquadInvite { to_identity } => {
                let to = Identity::new(to_identity);
                let invite = self.squads.lock().invite(identity, &to);
                invite.map(|outbox| {
                    if !self.presence.is_online(&to) {
                        self.reply_error(identity, "player_offline", "Player is not online");
                    }
                    self.dispatch(outbox);
                })
            }
            LobbyClientMsg::StartMatch { difficulty } => {
                if let Err(e) = self.start_match(identity, difficulty).await {
                    debug!(identity = %identity, error = %e, "Start match rejected");
                    self.reply_error(identity, e.code(), &e.to_string());
                }
                Ok(())
            }
            LobbyClientMsg::EnterMatchmaking => {
                self.queue
                    .lock()
                    .await
                    .enqueue(identity.clone(), display_name, Instant::now());
                self.send_status(identity, MatchmakingStatus::Searching);
                Ok(())
            }
            LobbyClientMsg::LeaveMatchmaking => {
                self.queue.lock().await.dequeue(identity);
                self.send_status(identity, MatchmakingStatus::Stopped);
                Ok(())
            }
            LobbyClientMsg::Ping => {
                self.presence.send(identity, LobbyServerMsg::Pong);
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!(identity = %identity, error = %e, "Squad operation rejected");
            self.reply_error(identity, e.code(), &e.to_string());
        }
    }

    /// Start a room for the caller's squad. The squad book stays locked
    /// from taking the pending-start lock until it is released, so no
    /// member can leave or change readiness while seats are handed out.
    pub async fn start_match(
        &self,
        leader: &Identity,
        difficulty: Option<u8>,
    ) -> Result<Uuid, StartMatchError> {
        let difficulty = difficulty.or(self.settings.default_difficulty);
        if let Some(level) = difficulty {
            if DifficultyTier::for_level(level).is_none() {
                return Err(ContentError::InvalidDifficulty(level).into());
            }
        }

        let mut squads = self.squads.lock();
        let (squad_id, members) = squads.begin_start(leader, Instant::now())?;
        info!(squad_id = %squad_id, members = members.len(), ?difficulty, "Starting match");

        let launched = self.launch(&members, difficulty);
        let outbox = squads.finish_start(&squad_id, launched.is_ok());
        drop(squads);

        self.dispatch(outbox);
        launched
    }

    /// Create the locked room and hand every member their own seat
    fn launch(&self, members: &[Identity], difficulty: Option<u8>) -> Result<Uuid, StartMatchError> {
        let options = RoomOptions {
            empty_timeout: self.settings.empty_room_timeout,
            ..RoomOptions::for_squad(members, difficulty)
        };
        let room = self.rooms.create_room(options)?;
        let ttl = self.settings.reservation_ttl;

        let mut results = room.reserve_seats(&self.signer, members, ttl);

        let transient: Vec<Identity> = results
            .iter()
            .filter(|(_, r)| matches!(r, Err(ReservationError::RoomUnavailable)))
            .map(|(id, _)| id.clone())
            .collect();
        if !transient.is_empty() {
            warn!(room_id = %room.id, count = transient.len(), "Retrying seat reservations");
            for (identity, retried) in room.reserve_seats(&self.signer, &transient, ttl) {
                if let Some(slot) = results.iter_mut().find(|(id, _)| id == &identity) {
                    slot.1 = retried;
                }
            }
        }

        let mut failed = 0;
        for (identity, result) in results {
            match result {
                Ok(reservation) => {
                    self.presence.set_room(&identity, Some(room.id));
                    self.presence
                        .send(&identity, LobbyServerMsg::GameReady { reservation });
                }
                Err(e) => {
                    failed += 1;
                    warn!(room_id = %room.id, identity = %identity, error = %e, "Seat reservation failed");
                    self.presence.send(
                        &identity,
                        LobbyServerMsg::GameReadyError {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        if failed > 0 {
            return Err(StartMatchError::Reservation { failed });
        }
        info!(room_id = %room.id, players = members.len(), "Room handed off");
        Ok(room.id)
    }

    /// One matchmaking round
    pub async fn process_queue(&self, now: Instant) {
        let round = self.queue.lock().await.process(now);

        for identity in &round.timed_out {
            self.send_status(identity, MatchmakingStatus::Timeout);
        }
        for decision in round.decisions {
            self.start_queued(decision).await;
        }
    }

    async fn start_queued(&self, decision: QueueDecision) {
        let members: Vec<(Identity, String)> = decision
            .members()
            .into_iter()
            .map(|e| (e.identity.clone(), e.display_name.clone()))
            .collect();
        let Some(leader) = members.first().map(|(id, _)| id.clone()) else {
            return;
        };

        let formed = self.squads.lock().create_ready(&members, Instant::now());
        let started = match formed {
            Ok((_, outbox)) => {
                self.dispatch(outbox);
                for (identity, _) in &members {
                    self.send_status(identity, MatchmakingStatus::Matched);
                }
                self.start_match(&leader, None).await.map(|_| ())
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = started {
            warn!(leader = %leader, error = %e, "Matchmaking start failed");
            if !matches!(e, StartMatchError::Reservation { .. }) {
                for (identity, _) in &members {
                    self.presence.send(
                        identity,
                        LobbyServerMsg::GameReadyError {
                            message: "Matchmaking failed".into(),
                        },
                    );
                }
            }
        }
    }

    /// Periodic queue processing
    pub async fn run_matchmaking(self: Arc<Self>) {
        let mut ticker = interval(self.settings.matchmaking_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.process_queue(Instant::now()).await;
        }
    }

    /// Periodic heartbeat: ping every session, evict those that stayed silent
    pub async fn run_heartbeat(self: Arc<Self>) {
        let mut ticker = interval(self.settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for (identity, conn_id) in self.presence.sweep() {
                warn!(identity = %identity, "Heartbeat missed, evicting session");
                self.on_disconnect(&identity, conn_id).await;
            }
        }
    }

    fn dispatch(&self, outbox: Outbox) {
        for (identity, msg) in outbox {
            self.presence.send(&identity, msg);
        }
    }

    fn send_status(&self, identity: &Identity, status: MatchmakingStatus) {
        self.presence
            .send(identity, LobbyServerMsg::MatchmakingStatus { status });
    }

    fn reply_error(&self, identity: &Identity, code: &str, message: &str) {
        self.presence.send(
            identity,
            LobbyServerMsg::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::presence::PresenceFrame;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    struct Harness {
        service: LobbyService,
        signer: Arc<ReservationSigner>,
        rooms: RoomRegistry,
    }

    type Inbox = mpsc::UnboundedReceiver<PresenceFrame>;

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let presence = Arc::new(PresenceRegistry::new(store));
        let rooms = RoomRegistry::new();
        let signer = Arc::new(ReservationSigner::new("test-secret"));
        let service = LobbyService::new(
            presence,
            rooms.clone(),
            signer.clone(),
            LobbySettings::default(),
        );
        Harness {
            service,
            signer,
            rooms,
        }
    }

    async fn connect(h: &Harness, name: &str) -> (Identity, Inbox, u64) {
        let identity = Identity::new(name);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = h.service.on_connect(&identity, name, tx).await;
        (identity, rx, conn)
    }

    fn messages(rx: &mut Inbox) -> Vec<LobbyServerMsg> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let PresenceFrame::Message(msg) = frame {
                out.push(msg);
            }
        }
        out
    }

    fn squad_id_of(h: &Harness, identity: &Identity) -> String {
        h.service.squads.lock().squad_of(identity).unwrap().id
    }

    #[tokio::test]
    async fn unready_member_blocks_start_without_creating_room() {
        let h = harness();
        let (a, mut rx_a, _) = connect(&h, "a").await;
        let (b, mut rx_b, _) = connect(&h, "b").await;

        h.service.handle(&a, LobbyClientMsg::CreateSquad).await;
        let squad_id = squad_id_of(&h, &a);
        h.service
            .handle(&b, LobbyClientMsg::JoinSquad { squad_id })
            .await;
        messages(&mut rx_a);
        messages(&mut rx_b);

        h.service
            .handle(&a, LobbyClientMsg::StartMatch { difficulty: None })
            .await;

        let errors = messages(&mut rx_a);
        assert!(matches!(
            errors.as_slice(),
            [LobbyServerMsg::Error { code, .. }] if code == "not_all_ready"
        ));
        assert!(messages(&mut rx_b).is_empty());
        assert_eq!(h.rooms.active_rooms(), 0);
        assert_eq!(h.service.squad_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_squad_gets_personal_tokens_and_is_disbanded() {
        let h = harness();
        let (a, mut rx_a, _) = connect(&h, "a").await;
        let (b, mut rx_b, _) = connect(&h, "b").await;

        h.service.handle(&a, LobbyClientMsg::CreateSquad).await;
        let squad_id = squad_id_of(&h, &a);
        h.service
            .handle(&b, LobbyClientMsg::JoinSquad { squad_id })
            .await;
        h.service
            .handle(&b, LobbyClientMsg::SetReady { ready: true })
            .await;
        messages(&mut rx_a);
        messages(&mut rx_b);

        let room_id = h.service.start_match(&a, Some(2)).await.unwrap();
        assert_eq!(h.rooms.active_rooms(), 1);

        for (who, rx) in [(&a, &mut rx_a), (&b, &mut rx_b)] {
            let msgs = messages(rx);
            let reservation = msgs
                .iter()
                .find_map(|m| match m {
                    LobbyServerMsg::GameReady { reservation } => Some(reservation.clone()),
                    _ => None,
                })
                .unwrap();
            assert_eq!(reservation.room_id, room_id);
            assert_eq!(&h.signer.verify(&reservation.token).unwrap().identity, who);
            assert!(msgs
                .iter()
                .any(|m| matches!(m, LobbyServerMsg::SquadDisbanded { .. })));
        }
        assert_eq!(h.service.squad_count(), 0);
        assert_eq!(h.service.presence().room_of(&a), Some(room_id));
    }

    #[tokio::test]
    async fn invalid_difficulty_is_rejected_before_locking() {
        let h = harness();
        let (a, _rx, _) = connect(&h, "a").await;
        h.service.handle(&a, LobbyClientMsg::CreateSquad).await;

        let err = h.service.start_match(&a, Some(9)).await.unwrap_err();
        assert_eq!(err.code(), "invalid_difficulty");
        assert!(h.service.start_match(&Identity::new("z"), None).await.is_err());
        assert_eq!(h.rooms.active_rooms(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_pairs_two_players_into_a_room() {
        let h = harness();
        let (a, mut rx_a, _) = connect(&h, "a").await;
        let (b, mut rx_b, _) = connect(&h, "b").await;
        let (c, _rx_c, _) = connect(&h, "c").await;

        for who in [&a, &b, &c] {
            h.service.handle(who, LobbyClientMsg::EnterMatchmaking).await;
        }
        h.service.process_queue(Instant::now()).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let msgs = messages(rx);
            assert!(msgs.contains(&LobbyServerMsg::MatchmakingStatus {
                status: MatchmakingStatus::Matched
            }));
            assert!(msgs
                .iter()
                .any(|m| matches!(m, LobbyServerMsg::GameReady { .. })));
        }
        assert_eq!(h.rooms.active_rooms(), 1);
        assert_eq!(h.service.queue_size().await, 1);

        let room_id = h.service.presence().room_of(&a).unwrap();
        assert_eq!(h.rooms.get(&room_id).unwrap().difficulty, None);
    }

    #[tokio::test(start_paused = true)]
    async fn start_without_difficulty_builds_survival_room() {
        let h = harness();
        let (a, _rx_a, _) = connect(&h, "a").await;
        h.service.handle(&a, LobbyClientMsg::CreateSquad).await;
        h.service
            .handle(&a, LobbyClientMsg::StartMatch { difficulty: None })
            .await;

        let room_id = h.service.presence().room_of(&a).unwrap();
        let room = h.rooms.get(&room_id).unwrap();
        assert_eq!(room.difficulty, None);

        let (b, _rx_b, _) = connect(&h, "b").await;
        h.service.handle(&b, LobbyClientMsg::CreateSquad).await;
        let room_id = h.service.start_match(&b, Some(3)).await.unwrap();
        assert_eq!(h.rooms.get(&room_id).unwrap().difficulty, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn configured_default_difficulty_fills_in() {
        let store = Arc::new(MemoryStore::new());
        let presence = Arc::new(PresenceRegistry::new(store));
        let rooms = RoomRegistry::new();
        let settings = LobbySettings {
            default_difficulty: Some(2),
            ..LobbySettings::default()
        };
        let service = LobbyService::new(
            presence,
            rooms.clone(),
            Arc::new(ReservationSigner::new("test-secret")),
            settings,
        );
        let a = Identity::new("a");
        let (tx, _rx) = mpsc::unbounded_channel();
        service.on_connect(&a, "a", tx).await;
        service.handle(&a, LobbyClientMsg::CreateSquad).await;

        let room_id = service.start_match(&a, None).await.unwrap();
        assert_eq!(rooms.get(&room_id).unwrap().difficulty, Some(2));
    }

    #[tokio::test]
    async fn disconnect_leaves_squad_and_queue() {
        let h = harness();
        let (a, _rx_a, conn_a) = connect(&h, "a").await;
        let (b, mut rx_b, _) = connect(&h, "b").await;

        h.service.handle(&a, LobbyClientMsg::CreateSquad).await;
        let squad_id = squad_id_of(&h, &a);
        h.service
            .handle(&b, LobbyClientMsg::JoinSquad { squad_id })
            .await;
        h.service.handle(&a, LobbyClientMsg::EnterMatchmaking).await;
        messages(&mut rx_b);

        h.service.on_disconnect(&a, conn_a).await;

        let view = h.service.squads.lock().squad_of(&b).unwrap();
        assert_eq!(view.leader, b);
        assert!(view.members[0].ready);
        assert_eq!(h.service.queue_size().await, 0);
        assert!(messages(&mut rx_b)
            .iter()
            .any(|m| matches!(m, LobbyServerMsg::SquadUpdate { .. })));
    }

    #[tokio::test]
    async fn ping_and_rejections_answer_only_the_sender() {
        let h = harness();
        let (a, mut rx_a, _) = connect(&h, "a").await;
        messages(&mut rx_a);

        h.service.handle(&a, LobbyClientMsg::Ping).await;
        h.service.handle(&a, LobbyClientMsg::LeaveSquad).await;

        let msgs = messages(&mut rx_a);
        assert_eq!(msgs[0], LobbyServerMsg::Pong);
        assert!(matches!(&msgs[1], LobbyServerMsg::Error { code, .. } if code == "not_in_squad"));
    }
}
