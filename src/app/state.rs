//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::game::{ReservationSigner, RoomOutcome, RoomRegistry};
use crate::lobby::{LobbyService, PresenceRegistry};
use crate::store::{MemoryStore, RecordStore, SupabaseClient, SupabaseStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
    pub presence: Arc<PresenceRegistry>,
    pub lobby: Arc<LobbyService>,
    pub rooms: RoomRegistry,
    pub signer: Arc<ReservationSigner>,
}

impl AppState {
    /// Build state with the store selected by configuration. The receiver
    /// yields one outcome per finished room.
    pub fn new(config: Config) -> (Self, mpsc::UnboundedReceiver<RoomOutcome>) {
        let store: Arc<dyn RecordStore> = match config.supabase() {
            Some((url, key)) => {
                info!(url, "Using Supabase record store");
                Arc::new(SupabaseStore::new(SupabaseClient::new(url, key)))
            }
            None => {
                info!("Using in-memory record store");
                Arc::new(MemoryStore::new())
            }
        };
        Self::with_store(config, store)
    }

    pub fn with_store(
        config: Config,
        store: Arc<dyn RecordStore>,
    ) -> (Self, mpsc::UnboundedReceiver<RoomOutcome>) {
        let config = Arc::new(config);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let rooms = RoomRegistry::new().with_outcomes(outcome_tx);
        let signer = Arc::new(ReservationSigner::new(&config.reservation_secret));
        let presence = Arc::new(PresenceRegistry::new(store.clone()));
        let lobby = Arc::new(LobbyService::new(
            presence.clone(),
            rooms.clone(),
            signer.clone(),
            config.lobby_settings(),
        ));

        let state = Self {
            config,
            store,
            presence,
            lobby,
            rooms,
            signer,
        };
        (state, outcome_rx)
    }
}
