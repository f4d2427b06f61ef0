//! Session/presence registry: who is connected to the lobby and how to
//! reach them

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{self, friends, RecordStore};
use crate::ws::protocol::{Identity, LobbyServerMsg};

/// Frames pushed to a lobby socket's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceFrame {
    Message(LobbyServerMsg),
    /// Transport-level ping; the pong marks the session alive
    Ping,
    /// Close the socket (replaced or evicted)
    Close,
}

pub type PresenceSender = mpsc::UnboundedSender<PresenceFrame>;

struct Session {
    conn_id: u64,
    display_name: String,
    tx: PresenceSender,
    alive: bool,
    room: Option<Uuid>,
}

/// One live lobby session per identity
pub struct PresenceRegistry {
    sessions: DashMap<Identity, Session>,
    next_conn_id: AtomicU64,
    store: Arc<dyn RecordStore>,
}

impl PresenceRegistry {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            sessions: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
            store,
        }
    }

    /// Register a session, replacing (and closing) any previous one for the
    /// same identity. Returns the connection id the socket must present on
    /// disconnect.
    pub async fn connect(&self, identity: &Identity, display_name: &str, tx: PresenceSender) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let session = Session {
            conn_id,
            display_name: display_name.to_string(),
            tx,
            alive: true,
            room: None,
        };
        if let Some(old) = self.sessions.insert(identity.clone(), session) {
            debug!(identity = %identity, old_conn = old.conn_id, "Replacing lobby session");
            let _ = old.tx.send(PresenceFrame::Close);
        }

        if let Err(e) = store::touch_profile(self.store.as_ref(), identity, Some(display_name)).await {
            warn!(identity = %identity, error = %e, "Failed to refresh profile");
        }
        self.notify_friends(
            identity,
            LobbyServerMsg::FriendOnline {
                identity: identity.clone(),
                display_name: display_name.to_string(),
            },
        )
        .await;

        info!(identity = %identity, conn_id, online = self.sessions.len(), "Lobby session connected");
        conn_id
    }

    /// Drop the session if it is still the one identified by `conn_id`.
    /// Returns false when a newer session has replaced it.
    pub async fn disconnect(&self, identity: &Identity, conn_id: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(identity, |_, s| s.conn_id == conn_id)
            .is_some();
        if !removed {
            return false;
        }

        if let Err(e) = store::touch_profile(self.store.as_ref(), identity, None).await {
            warn!(identity = %identity, error = %e, "Failed to record last seen");
        }
        self.notify_friends(
            identity,
            LobbyServerMsg::FriendOffline {
                identity: identity.clone(),
            },
        )
        .await;

        info!(identity = %identity, conn_id, online = self.sessions.len(), "Lobby session disconnected");
        true
    }

    /// Deliver to one identity. False when offline or the socket is gone.
    pub fn send(&self, identity: &Identity, msg: LobbyServerMsg) -> bool {
        self.sessions
            .get(identity)
            .map(|s| s.tx.send(PresenceFrame::Message(msg)).is_ok())
            .unwrap_or(false)
    }

    pub fn send_many<'a>(&self, identities: impl IntoIterator<Item = &'a Identity>, msg: &LobbyServerMsg) {
        for identity in identities {
            self.send(identity, msg.clone());
        }
    }

    pub fn is_online(&self, identity: &Identity) -> bool {
        self.sessions.contains_key(identity)
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }

    /// Online identities with display names, sorted by identity
    pub fn online(&self) -> Vec<(Identity, String)> {
        let mut online: Vec<_> = self
            .sessions
            .iter()
            .map(|s| (s.key().clone(), s.display_name.clone()))
            .collect();
        online.sort();
        online
    }

    pub fn display_name(&self, identity: &Identity) -> Option<String> {
        self.sessions.get(identity).map(|s| s.display_name.clone())
    }

    /// Heartbeat answer received
    pub fn mark_alive(&self, identity: &Identity) {
        if let Some(mut session) = self.sessions.get_mut(identity) {
            session.alive = true;
        }
    }

    /// Remember which room an identity was handed off to
    pub fn set_room(&self, identity: &Identity, room: Option<Uuid>) {
        if let Some(mut session) = self.sessions.get_mut(identity) {
            session.room = room;
        }
    }

    pub fn room_of(&self, identity: &Identity) -> Option<Uuid> {
        self.sessions.get(identity).and_then(|s| s.room)
    }

    /// One heartbeat round: sessions that did not answer the previous ping
    /// are closed and returned as `(identity, conn_id)`; the rest are
    /// pinged and must answer before the next round.
    pub fn sweep(&self) -> Vec<(Identity, u64)> {
        let mut stale = Vec::new();
        for mut session in self.sessions.iter_mut() {
            if !session.alive {
                let _ = session.tx.send(PresenceFrame::Close);
                stale.push((session.key().clone(), session.conn_id));
                continue;
            }
            session.alive = false;
            if session.tx.send(PresenceFrame::Ping).is_err() {
                stale.push((session.key().clone(), session.conn_id));
            }
        }
        stale
    }

    async fn notify_friends(&self, identity: &Identity, msg: LobbyServerMsg) {
        match friends::accepted_friends(self.store.as_ref(), identity).await {
            Ok(friends) => self.send_many(friends.iter(), &msg),
            Err(e) => warn!(identity = %identity, error = %e, "Failed to load friends"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> (PresenceRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (PresenceRegistry::new(store.clone()), store)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PresenceFrame>) -> Vec<PresenceFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn reconnect_replaces_and_stale_disconnect_is_ignored() {
        let (presence, _) = registry();
        let a = Identity::new("a");
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let first = presence.connect(&a, "A", tx1).await;
        let second = presence.connect(&a, "A2", tx2).await;
        assert_ne!(first, second);
        assert_eq!(drain(&mut rx1), vec![PresenceFrame::Close]);

        assert!(!presence.disconnect(&a, first).await);
        assert!(presence.is_online(&a));
        assert_eq!(presence.display_name(&a).as_deref(), Some("A2"));

        assert!(presence.disconnect(&a, second).await);
        assert!(!presence.is_online(&a));
    }

    #[tokio::test]
    async fn unanswered_ping_evicts_on_next_round() {
        let (presence, _) = registry();
        let a = Identity::new("a");
        let b = Identity::new("b");
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        presence.connect(&a, "A", tx_a).await;
        let conn_b = presence.connect(&b, "B", tx_b).await;

        assert!(presence.sweep().is_empty());
        assert_eq!(drain(&mut rx_a), vec![PresenceFrame::Ping]);

        presence.mark_alive(&a);
        assert_eq!(presence.sweep(), vec![(b.clone(), conn_b)]);
    }

    #[tokio::test]
    async fn friends_hear_about_online_and_offline() {
        let (presence, store) = registry();
        let a = Identity::new("a");
        let b = Identity::new("b");
        store::touch_profile(store.as_ref(), &b, None).await.unwrap();
        friends::request(store.as_ref(), &a, &b).await.unwrap();
        friends::accept(store.as_ref(), &a, &b).await.unwrap();

        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        presence.connect(&b, "B", tx_b).await;

        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let conn_a = presence.connect(&a, "Alpha", tx_a).await;
        presence.disconnect(&a, conn_a).await;

        assert_eq!(
            drain(&mut rx_b),
            vec![
                PresenceFrame::Message(LobbyServerMsg::FriendOnline {
                    identity: a.clone(),
                    display_name: "Alpha".into(),
                }),
                PresenceFrame::Message(LobbyServerMsg::FriendOffline { identity: a }),
            ]
        );
    }
}
