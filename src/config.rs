use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ANALYZE_URL: &str = "http://localhost:5000/analyze";
const DEFAULT_SESSION_FILE: &str = ".feastfit-session.json";
const DEFAULT_PICK_DELAY_MS: u64 = 1500;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Which realtime store backs the session
#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    /// Firebase Realtime Database at `url`
    Firebase {
        url: String,
        auth_token: Option<String>,
    },
    /// In-process store; nothing is shared with other clients
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub analyze_url: String,
    pub store: StoreConfig,
    pub session_file: PathBuf,
    pub pick_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            analyze_url: DEFAULT_ANALYZE_URL.to_string(),
            store: StoreConfig::Memory,
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
            pick_delay: Duration::from_millis(DEFAULT_PICK_DELAY_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key).and_then(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };

        let store = match get("FEASTFIT_DATABASE_URL") {
            Some(url) => StoreConfig::Firebase {
                url,
                auth_token: get("FEASTFIT_DATABASE_AUTH"),
            },
            None => StoreConfig::Memory,
        };

        Self {
            analyze_url: get("FEASTFIT_ANALYZE_URL")
                .unwrap_or_else(|| DEFAULT_ANALYZE_URL.to_string()),
            store,
            session_file: get("FEASTFIT_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE)),
            pick_delay: Duration::from_millis(number(
                "FEASTFIT_PICK_DELAY_MS",
                get("FEASTFIT_PICK_DELAY_MS"),
                DEFAULT_PICK_DELAY_MS,
            )),
            request_timeout: Duration::from_secs(number(
                "FEASTFIT_REQUEST_TIMEOUT_SECS",
                get("FEASTFIT_REQUEST_TIMEOUT_SECS"),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
        }
    }
}

fn number(key: &str, raw: Option<String>, default: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!("Invalid {}='{}', using default {}", key, raw, default);
            default
        }
    }
}
