//! Supabase (PostgREST) record store using the service_role key

use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};

use crate::ws::protocol::Identity;

use super::records::{FriendEdge, MatchHistoryEntry, PlayerProfile};
use super::{RecordStore, StoreResult};

const PROFILES: &str = "player_profiles";
const FRIENDS: &str = "friend_edges";
const HISTORY: &str = "match_history";

/// Supabase client for server-side database operations.
/// The service_role key bypasses RLS; it never leaves the server.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: Response) -> Result<Response, SupabaseError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(SupabaseError::Api { status, body })
    }

    /// Authenticated GET returning every matching row
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self.authed(self.client.get(&url)).send().await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)
    }

    /// Authenticated GET expecting at most one row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Option<T>, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self
            .authed(self.client.get(&url))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            // No rows found
            return Ok(None);
        }

        Self::check(response)
            .await?
            .json()
            .await
            .map(Some)
            .map_err(SupabaseError::Parse)
    }

    /// Plain insert
    pub async fn insert<T: Serialize>(&self, table: &str, data: &T) -> Result<(), SupabaseError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=minimal")
            .json(data)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Insert or merge on the `on_conflict` columns
    pub async fn upsert<T: Serialize>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), SupabaseError> {
        let url = format!("{}?on_conflict={}", self.rest_url(table), on_conflict);
        let response = self
            .authed(self.client.post(&url))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(data)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

/// [`RecordStore`] backed by Supabase tables
#[derive(Clone)]
pub struct SupabaseStore {
    client: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

/// PostgREST filter value; identities are lower-case hex or session ids
fn eq(identity: &Identity) -> String {
    format!("eq.{}", identity.as_str())
}

impl RecordStore for SupabaseStore {
    fn get_profile(&self, identity: Identity) -> BoxFuture<'_, StoreResult<Option<PlayerProfile>>> {
        async move {
            let query = format!("identity={}", eq(&identity));
            Ok(self.client.get_one(PROFILES, &query).await?)
        }
        .boxed()
    }

    fn upsert_profile(&self, profile: PlayerProfile) -> BoxFuture<'_, StoreResult<()>> {
        async move {
            self.client.upsert(PROFILES, &profile, "identity").await?;
            Ok(())
        }
        .boxed()
    }

    fn friend_edges(&self, identity: Identity) -> BoxFuture<'_, StoreResult<Vec<FriendEdge>>> {
        async move {
            let query = format!(
                "or=(owner.eq.{id},friend.eq.{id})",
                id = identity.as_str()
            );
            Ok(self.client.get(FRIENDS, &query).await?)
        }
        .boxed()
    }

    fn upsert_friend_edge(&self, edge: FriendEdge) -> BoxFuture<'_, StoreResult<()>> {
        async move {
            self.client.upsert(FRIENDS, &edge, "owner,friend").await?;
            Ok(())
        }
        .boxed()
    }

    fn append_history(&self, entry: MatchHistoryEntry) -> BoxFuture<'_, StoreResult<()>> {
        async move {
            self.client.insert(HISTORY, &entry).await?;
            Ok(())
        }
        .boxed()
    }

    fn history(
        &self,
        identity: Identity,
        limit: usize,
    ) -> BoxFuture<'_, StoreResult<Vec<MatchHistoryEntry>>> {
        async move {
            let query = format!(
                "identity={}&order=played_at.desc&limit={}",
                eq(&identity),
                limit
            );
            Ok(self.client.get(HISTORY, &query).await?)
        }
        .boxed()
    }
}

/// Supabase errors
#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),
}
