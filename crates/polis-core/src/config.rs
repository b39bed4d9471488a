// ── Runtime engine configuration ──
//
// These types describe *how* to reach the data platform. They carry
// credential data and connection tuning, but never touch disk. The
// embedding application (or polis-config) constructs an `EngineConfig`
// and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::multiplexer::SweepPolicy;
use crate::store::RetryPolicy;

/// TLS verification strategy.
#[derive(Debug, Clone, Default)]
pub enum TlsVerification {
    /// System CA store (strict). Default.
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-hosted platforms behind self-signed certs).
    DangerAcceptInvalid,
}

/// Configuration for one [`SyncEngine`](crate::SyncEngine).
///
/// Built by the embedding application; core never reads config files.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Platform base URL (e.g. `https://office-db.example.org`).
    pub url: Url,
    /// Service key sent as the `apikey` header and on the change feed.
    pub service_key: SecretString,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
    /// Store reconnection backoff.
    pub retry: RetryPolicy,
    /// Multiplexer idle-connection sweep tuning.
    pub sweep: SweepPolicy,
}

impl EngineConfig {
    pub fn new(url: Url, service_key: SecretString) -> Self {
        Self {
            url,
            service_key,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            sweep: SweepPolicy::default(),
        }
    }
}
