// ── Engine facade ──
//
// Composition root for the data layer: builds the transport, the REST
// and realtime clients, and the multiplexer, and vends one store per
// entity kind. Injecting the one shared multiplexer here is what makes
// the single-connection-per-collection invariant hold structurally
// across every store in the process.

use std::sync::Arc;

use tracing::info;

use polis_api::{RealtimeClient, RestClient, TlsMode, TransportConfig};

use crate::config::{EngineConfig, TlsVerification};
use crate::error::CoreError;
use crate::feed::ChangeFeed;
use crate::model::{Citizen, MilitaryCase, Notification, Reminder, ServiceRequest};
use crate::multiplexer::ChangeFeedMultiplexer;
use crate::store::EntityStore;

/// The application-facing entry point.
///
/// One instance per process, created at composition time and shared with
/// every consumer. Stores are created here and live until
/// [`shutdown`](Self::shutdown).
pub struct SyncEngine {
    mux: Arc<ChangeFeedMultiplexer>,
    citizens: EntityStore<Citizen, RestClient>,
    requests: EntityStore<ServiceRequest, RestClient>,
    military_cases: EntityStore<MilitaryCase, RestClient>,
    reminders: EntityStore<Reminder, RestClient>,
    notifications: EntityStore<Notification, RestClient>,
}

impl SyncEngine {
    /// Build the engine. Does NOT load data -- call
    /// [`initialize_all`](Self::initialize_all) (or initialize stores
    /// individually) once a runtime is driving it.
    pub fn new(config: &EngineConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: match &config.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: config.timeout,
        };

        let http = transport.build_client(&config.service_key)?;
        let rest = RestClient::new(&config.url, http)?;
        let realtime = RealtimeClient::new(&config.url, config.service_key.clone())?;

        let feed: Arc<dyn ChangeFeed> = Arc::new(realtime);
        let mux = Arc::new(ChangeFeedMultiplexer::with_sweep(feed, config.sweep));

        Ok(Self {
            citizens: EntityStore::with_retry(rest.clone(), Arc::clone(&mux), config.retry),
            requests: EntityStore::with_retry(rest.clone(), Arc::clone(&mux), config.retry),
            military_cases: EntityStore::with_retry(rest.clone(), Arc::clone(&mux), config.retry),
            reminders: EntityStore::with_retry(rest.clone(), Arc::clone(&mux), config.retry),
            notifications: EntityStore::with_retry(rest, Arc::clone(&mux), config.retry),
            mux,
        })
    }

    /// Bulk-load every store concurrently.
    pub async fn initialize_all(&self) -> Result<(), CoreError> {
        tokio::try_join!(
            self.citizens.initialize(false),
            self.requests.initialize(false),
            self.military_cases.initialize(false),
            self.reminders.initialize(false),
            self.notifications.initialize(false),
        )?;
        info!("all stores initialized");
        Ok(())
    }

    // ── Store accessors ──────────────────────────────────────────────

    pub fn citizens(&self) -> &EntityStore<Citizen, RestClient> {
        &self.citizens
    }

    pub fn requests(&self) -> &EntityStore<ServiceRequest, RestClient> {
        &self.requests
    }

    pub fn military_cases(&self) -> &EntityStore<MilitaryCase, RestClient> {
        &self.military_cases
    }

    pub fn reminders(&self) -> &EntityStore<Reminder, RestClient> {
        &self.reminders
    }

    pub fn notifications(&self) -> &EntityStore<Notification, RestClient> {
        &self.notifications
    }

    /// The shared multiplexer (mostly for observability).
    pub fn multiplexer(&self) -> &Arc<ChangeFeedMultiplexer> {
        &self.mux
    }

    /// Disconnect every store and close every live connection.
    /// Process-shutdown only.
    pub async fn shutdown(&self) {
        tokio::join!(
            self.citizens.disconnect(),
            self.requests.disconnect(),
            self.military_cases.disconnect(),
            self.reminders.disconnect(),
            self.notifications.disconnect(),
        );
        self.mux.disconnect_all();
        info!("sync engine shut down");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use secrecy::SecretString;

    use crate::store::StoreState;

    #[tokio::test]
    async fn engine_builds_without_connecting() {
        let config = EngineConfig::new(
            url::Url::parse("https://office-db.example.org").unwrap(),
            SecretString::from("sk-test".to_owned()),
        );

        let engine = SyncEngine::new(&config).unwrap();

        assert_eq!(engine.multiplexer().live_connections(), 0);
        assert_eq!(engine.citizens().state(), StoreState::Uninitialized);
        assert_eq!(engine.requests().state(), StoreState::Uninitialized);
        assert!(engine.notifications().is_empty());

        engine.shutdown().await;
        assert_eq!(engine.military_cases().state(), StoreState::Disconnected);
        assert_eq!(engine.reminders().state(), StoreState::Disconnected);
    }
}
