//! Friend requests and friend lists on top of a record store

use chrono::Utc;

use crate::ws::protocol::Identity;

use super::records::{FriendEdge, FriendStatus};
use super::{RecordStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum FriendError {
    #[error("Cannot send a friend request to yourself")]
    SelfRequest,

    #[error("Player not found")]
    UnknownPlayer,

    #[error("No pending friend request")]
    NoPendingRequest,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Record a pending request `from -> to`. An existing edge is left alone.
pub async fn request(
    store: &dyn RecordStore,
    from: &Identity,
    to: &Identity,
) -> Result<(), FriendError> {
    if from == to {
        return Err(FriendError::SelfRequest);
    }
    if store.get_profile(to.clone()).await?.is_none() {
        return Err(FriendError::UnknownPlayer);
    }

    let edges = store.friend_edges(from.clone()).await?;
    if edges.iter().any(|e| e.links(from, to)) {
        return Ok(());
    }
    store
        .upsert_friend_edge(FriendEdge::pending(from.clone(), to.clone(), Utc::now()))
        .await?;
    Ok(())
}

/// `to` accepts the pending request sent by `from`. Both directions end up
/// accepted.
pub async fn accept(
    store: &dyn RecordStore,
    from: &Identity,
    to: &Identity,
) -> Result<(), FriendError> {
    let edges = store.friend_edges(from.clone()).await?;
    let mut pending = edges
        .into_iter()
        .find(|e| e.links(from, to) && e.status == FriendStatus::Pending)
        .ok_or(FriendError::NoPendingRequest)?;

    pending.status = FriendStatus::Accepted;
    store.upsert_friend_edge(pending).await?;

    let mut reverse = FriendEdge::pending(to.clone(), from.clone(), Utc::now());
    reverse.status = FriendStatus::Accepted;
    store.upsert_friend_edge(reverse).await?;
    Ok(())
}

/// Identities `identity` has an accepted friendship with
pub async fn accepted_friends(
    store: &dyn RecordStore,
    identity: &Identity,
) -> Result<Vec<Identity>, StoreError> {
    let edges = store.friend_edges(identity.clone()).await?;
    Ok(edges
        .into_iter()
        .filter(|e| &e.owner == identity && e.status == FriendStatus::Accepted)
        .map(|e| e.friend)
        .collect())
}
