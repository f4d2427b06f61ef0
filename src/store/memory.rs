//! In-process record store

use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;

use crate::ws::protocol::Identity;

use super::records::{FriendEdge, MatchHistoryEntry, PlayerProfile};
use super::{RecordStore, StoreResult};

/// Records kept in memory for the lifetime of the process
#[derive(Default)]
pub struct MemoryStore {
    profiles: DashMap<Identity, PlayerProfile>,
    edges: RwLock<Vec<FriendEdge>>,
    history: DashMap<Identity, Vec<MatchHistoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get_profile(&self, identity: Identity) -> BoxFuture<'_, StoreResult<Option<PlayerProfile>>> {
        let profile = self.profiles.get(&identity).map(|p| p.value().clone());
        future::ready(Ok(profile)).boxed()
    }

    fn upsert_profile(&self, profile: PlayerProfile) -> BoxFuture<'_, StoreResult<()>> {
        self.profiles.insert(profile.identity.clone(), profile);
        future::ready(Ok(())).boxed()
    }

    fn friend_edges(&self, identity: Identity) -> BoxFuture<'_, StoreResult<Vec<FriendEdge>>> {
        let edges = self
            .edges
            .read()
            .iter()
            .filter(|e| e.owner == identity || e.friend == identity)
            .cloned()
            .collect();
        future::ready(Ok(edges)).boxed()
    }

    fn upsert_friend_edge(&self, edge: FriendEdge) -> BoxFuture<'_, StoreResult<()>> {
        let mut edges = self.edges.write();
        match edges.iter_mut().find(|e| e.links(&edge.owner, &edge.friend)) {
            Some(existing) => existing.status = edge.status,
            None => edges.push(edge),
        }
        future::ready(Ok(())).boxed()
    }

    fn append_history(&self, entry: MatchHistoryEntry) -> BoxFuture<'_, StoreResult<()>> {
        self.history
            .entry(entry.identity.clone())
            .or_default()
            .push(entry);
        future::ready(Ok(())).boxed()
    }

    fn history(
        &self,
        identity: Identity,
        limit: usize,
    ) -> BoxFuture<'_, StoreResult<Vec<MatchHistoryEntry>>> {
        let entries = self
            .history
            .get(&identity)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default();
        future::ready(Ok(entries)).boxed()
    }
}
