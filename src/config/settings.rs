//! Application settings loading from stockroom.toml
//!
//! Every knob has a working default, so a missing configuration file yields a
//! usable setup; a malformed file is an error rather than a silent fallback.
//! The database URL can always be overridden through the `DATABASE_URL`
//! environment variable (a `.env` file is honored when present).

use crate::core::posting::RetryPolicy;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Configuration structure representing the entire stockroom.toml file
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Database connection settings
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Keyed-lock tuning
    #[serde(default)]
    pub locking: LockingSettings,
    /// Reservation TTL and cleanup tuning
    #[serde(default)]
    pub reservations: ReservationSettings,
    /// Posting queue and worker tuning
    #[serde(default)]
    pub posting: PostingSettings,
}

/// Database connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// SQLite connection URL; `DATABASE_URL` overrides it
    #[serde(default = "default_database_url")]
    pub url: String,
}

/// Keyed-lock tuning
#[derive(Debug, Deserialize, Clone)]
pub struct LockingSettings {
    /// How long a caller waits for an (item, warehouse) lock
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

/// Reservation TTL and cleanup tuning
#[derive(Debug, Deserialize, Clone)]
pub struct ReservationSettings {
    /// TTL applied when the originating system does not request one
    #[serde(default = "default_ttl_minutes")]
    pub default_ttl_minutes: u64,
    /// How often the cleanup worker sweeps for expired holds
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// Posting queue and worker tuning
#[derive(Debug, Deserialize, Clone)]
pub struct PostingSettings {
    /// How often the posting worker polls for due items
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum submissions in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-call timeout on ERP submission
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    /// Transient-failure budget before an item goes Failed
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    /// First retry delay; doubles per attempt
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    /// Cap on the exponential retry delay
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://data/stockroom.sqlite".to_string()
}
const fn default_acquire_timeout_secs() -> u64 {
    5
}
const fn default_ttl_minutes() -> u64 {
    30
}
const fn default_cleanup_interval_secs() -> u64 {
    60
}
const fn default_poll_interval_secs() -> u64 {
    10
}
const fn default_max_concurrent() -> usize {
    4
}
const fn default_submit_timeout_secs() -> u64 {
    30
}
const fn default_max_retries() -> i32 {
    3
}
const fn default_base_delay_secs() -> u64 {
    5
}
const fn default_max_delay_secs() -> u64 {
    300
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for LockingSettings {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            default_ttl_minutes: default_ttl_minutes(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for PostingSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_concurrent: default_max_concurrent(),
            submit_timeout_secs: default_submit_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file; a missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Pick up a .env file before any environment override is consulted.
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        if !path.exists() {
            info!("No settings file at {}; using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("Failed to read settings file: {e}"),
        })?;

        toml::from_str(&contents).map_err(|e| Error::Config {
            message: format!("Failed to parse {}: {e}", path.display()),
        })
    }

    /// Loads settings from the default location (./stockroom.toml)
    pub fn load_default() -> Result<Self> {
        Self::load("stockroom.toml")
    }

    /// The effective database URL: `DATABASE_URL` wins over the file.
    #[must_use]
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }

    /// Lock acquisition timeout as a [`Duration`].
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.locking.acquire_timeout_secs)
    }

    /// Default reservation TTL as a [`Duration`].
    #[must_use]
    pub const fn default_reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservations.default_ttl_minutes * 60)
    }

    /// Cleanup sweep interval as a [`Duration`].
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.reservations.cleanup_interval_secs)
    }

    /// Posting poll interval as a [`Duration`].
    #[must_use]
    pub const fn posting_poll_interval(&self) -> Duration {
        Duration::from_secs(self.posting.poll_interval_secs)
    }

    /// Per-call ERP submission timeout as a [`Duration`].
    #[must_use]
    pub const fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.posting.submit_timeout_secs)
    }

    /// The retry policy configured for the posting worker.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.posting.max_retries)
            .with_base_delay(Duration::from_secs(self.posting.base_delay_secs))
            .with_max_delay(Duration::from_secs(self.posting.max_delay_secs))
    }
}
