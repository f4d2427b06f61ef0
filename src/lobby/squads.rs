//! Squad bookkeeping. All mutation happens on a `SquadBook` held under one
//! lock; every operation validates before it mutates and returns the lobby
//! messages to deliver once the lock is released.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::ws::protocol::{Identity, LobbyServerMsg, SquadMemberView, SquadView};

pub const MAX_SQUAD_SIZE: usize = 3;
/// A start that has not finished after this long no longer blocks a retry
pub const START_LOCK_STALE: Duration = Duration::from_secs(15);

/// Messages to deliver after the squad lock is released
pub type Outbox = Vec<(Identity, LobbyServerMsg)>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SquadError {
    #[error("Squad not found")]
    NotFound,

    #[error("Squad is full (max 3)")]
    Full,

    #[error("Already in squad")]
    AlreadyMember,

    #[error("Not in a squad")]
    NotInSquad,

    #[error("Only the squad leader can do that")]
    NotLeader,

    #[error("Not all members are ready")]
    NotAllReady,

    #[error("Match is already starting")]
    StartInProgress,
}

impl SquadError {
    /// Stable code for `error{code,message}` frames
    pub fn code(&self) -> &'static str {
        match self {
            SquadError::NotFound => "squad_not_found",
            SquadError::Full => "squad_full",
            SquadError::AlreadyMember => "already_in_squad",
            SquadError::NotInSquad => "not_in_squad",
            SquadError::NotLeader => "not_leader",
            SquadError::NotAllReady => "not_all_ready",
            SquadError::StartInProgress => "start_in_progress",
        }
    }
}

#[derive(Debug, Clone)]
struct Member {
    identity: Identity,
    display_name: String,
    ready: bool,
}

#[derive(Debug, Clone)]
struct Squad {
    id: String,
    leader: Identity,
    members: Vec<Member>,
    starting_since: Option<Instant>,
}

impl Squad {
    fn view(&self) -> SquadView {
        SquadView {
            id: self.id.clone(),
            leader: self.leader.clone(),
            members: self
                .members
                .iter()
                .map(|m| SquadMemberView {
                    identity: m.identity.clone(),
                    display_name: m.display_name.clone(),
                    ready: m.ready,
                })
                .collect(),
        }
    }

    fn member_ids(&self) -> Vec<Identity> {
        self.members.iter().map(|m| m.identity.clone()).collect()
    }

    fn is_starting(&self, now: Instant) -> bool {
        self.starting_since
            .is_some_and(|since| now.saturating_duration_since(since) < START_LOCK_STALE)
    }

    /// `squad_update` for every member
    fn update(&self, outbox: &mut Outbox) {
        let view = self.view();
        for member in &self.members {
            outbox.push((
                member.identity.clone(),
                LobbyServerMsg::SquadUpdate {
                    squad: view.clone(),
                },
            ));
        }
    }
}

/// Squads plus the member index
#[derive(Debug, Default)]
pub struct SquadBook {
    squads: HashMap<String, Squad>,
    by_member: HashMap<Identity, String>,
}

impl SquadBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.squads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.squads.is_empty()
    }

    pub fn get(&self, squad_id: &str) -> Option<SquadView> {
        self.squads.get(squad_id).map(Squad::view)
    }

    pub fn squad_of(&self, identity: &Identity) -> Option<SquadView> {
        self.by_member
            .get(identity)
            .and_then(|id| self.squads.get(id))
            .map(Squad::view)
    }

    /// Members of a squad with a live pending start cannot change anything
    /// about their membership until the start finishes
    fn ensure_not_starting(&self, identity: &Identity, now: Instant) -> Result<(), SquadError> {
        let starting = self
            .by_member
            .get(identity)
            .and_then(|id| self.squads.get(id))
            .is_some_and(|squad| squad.is_starting(now));
        if starting {
            return Err(SquadError::StartInProgress);
        }
        Ok(())
    }

    fn new_squad_id(&self) -> String {
        loop {
            let id = format!("s_{}", hex::encode(rand::random::<[u8; 4]>()));
            if !self.squads.contains_key(&id) {
                return id;
            }
        }
    }

    /// New squad led by `leader`, who leaves any previous squad first
    pub fn create(
        &mut self,
        leader: &Identity,
        display_name: &str,
        now: Instant,
    ) -> Result<(SquadView, Outbox), SquadError> {
        let mut outbox = match self.leave(leader, now) {
            Ok(outbox) => outbox,
            Err(SquadError::NotInSquad) => Outbox::new(),
            Err(e) => return Err(e),
        };

        let id = self.new_squad_id();
        let squad = Squad {
            id: id.clone(),
            leader: leader.clone(),
            members: vec![Member {
                identity: leader.clone(),
                display_name: display_name.to_string(),
                ready: true,
            }],
            starting_since: None,
        };
        squad.update(&mut outbox);
        let view = squad.view();

        self.by_member.insert(leader.clone(), id.clone());
        self.squads.insert(id, squad);
        Ok((view, outbox))
    }

    pub fn join(
        &mut self,
        squad_id: &str,
        identity: &Identity,
        display_name: &str,
        now: Instant,
    ) -> Result<Outbox, SquadError> {
        let squad = self.squads.get(squad_id).ok_or(SquadError::NotFound)?;
        if squad.members.iter().any(|m| &m.identity == identity) {
            return Err(SquadError::AlreadyMember);
        }
        if squad.members.len() >= MAX_SQUAD_SIZE {
            return Err(SquadError::Full);
        }
        if squad.is_starting(now) {
            return Err(SquadError::StartInProgress);
        }
        self.ensure_not_starting(identity, now)?;

        let mut outbox = self.leave(identity, now).unwrap_or_default();

        let squad = self.squads.get_mut(squad_id).ok_or(SquadError::NotFound)?;
        squad.members.push(Member {
            identity: identity.clone(),
            display_name: display_name.to_string(),
            ready: false,
        });
        squad.update(&mut outbox);
        self.by_member.insert(identity.clone(), squad_id.to_string());
        Ok(outbox)
    }

    /// Leave the current squad. The next member is promoted (and forced
    /// ready) when the leader leaves; an empty squad is destroyed.
    pub fn leave(&mut self, identity: &Identity, now: Instant) -> Result<Outbox, SquadError> {
        self.ensure_not_starting(identity, now)?;
        let squad_id = self
            .by_member
            .remove(identity)
            .ok_or(SquadError::NotInSquad)?;
        let mut outbox = vec![(
            identity.clone(),
            LobbyServerMsg::SquadDisbanded {
                squad_id: squad_id.clone(),
            },
        )];

        let Some(squad) = self.squads.get_mut(&squad_id) else {
            return Ok(outbox);
        };
        squad.members.retain(|m| &m.identity != identity);

        match squad.members.first_mut() {
            None => {
                self.squads.remove(&squad_id);
            }
            Some(first) => {
                if &squad.leader == identity {
                    squad.leader = first.identity.clone();
                    first.ready = true;
                }
                squad.update(&mut outbox);
            }
        }
        Ok(outbox)
    }

    /// Leader stays ready whatever is asked
    pub fn set_ready(
        &mut self,
        identity: &Identity,
        ready: bool,
        now: Instant,
    ) -> Result<Outbox, SquadError> {
        self.ensure_not_starting(identity, now)?;
        let squad_id = self.by_member.get(identity).ok_or(SquadError::NotInSquad)?;
        let squad = self.squads.get_mut(squad_id).ok_or(SquadError::NotFound)?;
        let is_leader = &squad.leader == identity;
        let member = squad
            .members
            .iter_mut()
            .find(|m| &m.identity == identity)
            .ok_or(SquadError::NotInSquad)?;
        member.ready = ready || is_leader;

        let mut outbox = Outbox::new();
        squad.update(&mut outbox);
        Ok(outbox)
    }

    /// Remove the squad and tell every member
    pub fn disband(&mut self, squad_id: &str) -> Outbox {
        let Some(squad) = self.squads.remove(squad_id) else {
            return Outbox::new();
        };
        squad
            .members
            .iter()
            .map(|m| {
                self.by_member.remove(&m.identity);
                (
                    m.identity.clone(),
                    LobbyServerMsg::SquadDisbanded {
                        squad_id: squad.id.clone(),
                    },
                )
            })
            .collect()
    }

    /// Invitation from a squad member to anyone; notification only
    pub fn invite(&self, from: &Identity, to: &Identity) -> Result<Outbox, SquadError> {
        let squad_id = self.by_member.get(from).ok_or(SquadError::NotInSquad)?;
        let squad = self.squads.get(squad_id).ok_or(SquadError::NotFound)?;
        let from_name = squad
            .members
            .iter()
            .find(|m| &m.identity == from)
            .map(|m| m.display_name.clone())
            .unwrap_or_else(|| from.short());

        Ok(vec![(
            to.clone(),
            LobbyServerMsg::SquadInvite {
                from: from.clone(),
                from_name,
                squad_id: squad.id.clone(),
            },
        )])
    }

    /// Take the pending-start lock for the leader's squad. Returns the squad
    /// id and members in join order.
    pub fn begin_start(
        &mut self,
        identity: &Identity,
        now: Instant,
    ) -> Result<(String, Vec<Identity>), SquadError> {
        let squad_id = self.by_member.get(identity).ok_or(SquadError::NotInSquad)?;
        let squad = self.squads.get_mut(squad_id).ok_or(SquadError::NotFound)?;
        if &squad.leader != identity {
            return Err(SquadError::NotLeader);
        }
        if squad.members.is_empty() || !squad.members.iter().all(|m| m.ready) {
            return Err(SquadError::NotAllReady);
        }
        if squad.is_starting(now) {
            return Err(SquadError::StartInProgress);
        }

        squad.starting_since = Some(now);
        Ok((squad.id.clone(), squad.member_ids()))
    }

    /// Release the pending-start lock; a successful start disbands the squad
    pub fn finish_start(&mut self, squad_id: &str, started: bool) -> Outbox {
        if started {
            return self.disband(squad_id);
        }
        if let Some(squad) = self.squads.get_mut(squad_id) {
            squad.starting_since = None;
        }
        Outbox::new()
    }

    /// Fresh squad with every member ready, used by matchmaking. Members
    /// leave their previous squads. Nothing changes when any member cannot
    /// be moved.
    pub fn create_ready(
        &mut self,
        members: &[(Identity, String)],
        now: Instant,
    ) -> Result<(String, Outbox), SquadError> {
        let Some(((leader, leader_name), rest)) = members.split_first() else {
            return Err(SquadError::NotFound);
        };
        if members.len() > MAX_SQUAD_SIZE {
            return Err(SquadError::Full);
        }
        for (i, (identity, _)) in members.iter().enumerate() {
            if members[..i].iter().any(|(seen, _)| seen == identity) {
                return Err(SquadError::AlreadyMember);
            }
            self.ensure_not_starting(identity, now)?;
        }

        let (view, mut outbox) = self.create(leader, leader_name, now)?;
        for (identity, name) in rest {
            let added = self
                .join(&view.id, identity, name, now)
                .and_then(|joined| Ok((joined, self.set_ready(identity, true, now)?)));
            match added {
                Ok((joined, readied)) => {
                    outbox.extend(joined);
                    outbox.extend(readied);
                }
                Err(e) => {
                    self.disband(&view.id);
                    return Err(e);
                }
            }
        }
        Ok((view.id, outbox))
    }
}
