//! Record storage: profiles, friendships and match history
//!
//! Everything goes through [`RecordStore`]. The in-memory backend is the
//! default; the Supabase backend is used when credentials are configured.

pub mod friends;
pub mod history;
pub mod memory;
pub mod records;
pub mod supabase;

use futures::future::BoxFuture;

use crate::ws::protocol::Identity;

pub use friends::FriendError;
pub use history::HistoryRecorder;
pub use memory::MemoryStore;
pub use records::{FriendEdge, FriendStatus, MatchHistoryEntry, PlayerProfile};
pub use supabase::{SupabaseClient, SupabaseError, SupabaseStore};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Supabase error: {0}")]
    Supabase(#[from] SupabaseError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Async record storage shared by the lobby, HTTP routes and the history
/// recorder. Never called from inside a room tick.
pub trait RecordStore: Send + Sync {
    fn get_profile(&self, identity: Identity) -> BoxFuture<'_, StoreResult<Option<PlayerProfile>>>;

    fn upsert_profile(&self, profile: PlayerProfile) -> BoxFuture<'_, StoreResult<()>>;

    /// Every edge where `identity` is owner or friend
    fn friend_edges(&self, identity: Identity) -> BoxFuture<'_, StoreResult<Vec<FriendEdge>>>;

    fn upsert_friend_edge(&self, edge: FriendEdge) -> BoxFuture<'_, StoreResult<()>>;

    fn append_history(&self, entry: MatchHistoryEntry) -> BoxFuture<'_, StoreResult<()>>;

    /// Newest first, at most `limit` entries
    fn history(
        &self,
        identity: Identity,
        limit: usize,
    ) -> BoxFuture<'_, StoreResult<Vec<MatchHistoryEntry>>>;
}

/// Create the profile if missing and refresh `last_seen` (and the display
/// name when one is given)
pub async fn touch_profile(
    store: &dyn RecordStore,
    identity: &Identity,
    display_name: Option<&str>,
) -> StoreResult<PlayerProfile> {
    let now = chrono::Utc::now();
    let profile = match store.get_profile(identity.clone()).await? {
        Some(mut profile) => {
            if let Some(name) = display_name {
                profile.display_name = name.to_string();
            }
            profile.last_seen = now;
            profile
        }
        None => PlayerProfile::new(
            identity.clone(),
            display_name.map(str::to_string).unwrap_or_else(|| identity.short()),
            now,
        ),
    };
    store.upsert_profile(profile.clone()).await?;
    Ok(profile)
}

/// Display name from the profile, falling back to the short identity
pub async fn display_name_of(store: &dyn RecordStore, identity: &Identity) -> String {
    match store.get_profile(identity.clone()).await {
        Ok(Some(profile)) => profile.display_name,
        _ => identity.short(),
    }
}
