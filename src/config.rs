//! Pipeline configuration.
//!
//! Holds the target identity, the pre-shared HMAC key and the tunables
//! of the capture session. Values can be built in code or loaded from the
//! environment (optionally via a `.env` file).

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

/// Packets processed before the watchdog stops the session.
pub const DEFAULT_PACKET_BUDGET: u64 = 40;

/// How often the watchdog looks at the packet count.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_millis(10);

/// Shortest watchdog interval accepted.
pub const MIN_WATCHDOG_INTERVAL: Duration = Duration::from_millis(1);

/// Capacity of the frame source to processor queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Minimum time between two accepted button edges.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Polling interval of the trigger input line.
pub const DEFAULT_TRIGGER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// HCI device the capture processes attach to.
pub const DEFAULT_HCI_DEVICE: &str = "hci0";

/// File the exporter appends rows to.
pub const DEFAULT_EXPORT_PATH: &str = "saved_data.csv";

/// Identifier of the target device: 16 hex characters (8 bytes), big-endian,
/// lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Number of hex characters in an identity.
    pub const HEX_LEN: usize = 16;

    /// Validate and normalize an identity string.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.len() != Self::HEX_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidParameter {
                name: "device_id".to_string(),
                value: value.to_string(),
            });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// The lower-case hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DeviceIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Pre-shared HMAC-SHA256 key.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    /// Create a key from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a key from its hex encoding.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| Error::InvalidParameter {
            name: "secret_key".to_string(),
            value: "<redacted>".to_string(),
        })?;
        if bytes.is_empty() {
            return Err(Error::InvalidParameter {
                name: "secret_key".to_string(),
                value: "<empty>".to_string(),
            });
        }
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(<{} bytes>)", self.0.len())
    }
}

/// Configuration for a [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Device the session locks onto.
    pub target_identity: DeviceIdentity,
    /// Key used to verify reassembled messages.
    pub secret_key: SecretKey,
    /// Stop once more than this many packets were processed.
    pub packet_budget: u64,
    /// Watchdog polling interval.
    pub watchdog_interval: Duration,
    /// Queue capacity between frame source and processor.
    pub queue_capacity: usize,
    /// Button debounce window.
    pub debounce: Duration,
    /// Button polling interval.
    pub trigger_poll_interval: Duration,
    /// HCI device name for the capture processes.
    pub hci_device: String,
    /// Prefix capture commands with `sudo`.
    pub use_sudo: bool,
    /// Export file path.
    pub export_path: PathBuf,
}

impl PipelineConfig {
    /// Create a configuration with default tunables.
    pub fn new(target_identity: DeviceIdentity, secret_key: SecretKey) -> Self {
        Self {
            target_identity,
            secret_key,
            packet_budget: DEFAULT_PACKET_BUDGET,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            debounce: DEFAULT_DEBOUNCE,
            trigger_poll_interval: DEFAULT_TRIGGER_POLL_INTERVAL,
            hci_device: DEFAULT_HCI_DEVICE.to_string(),
            use_sudo: true,
            export_path: PathBuf::from(DEFAULT_EXPORT_PATH),
        }
    }

    /// Load configuration from the environment.
    ///
    /// A `.env` file in the working directory is read first if present.
    /// `CAPSYNC_DEVICE_ID` and `CAPSYNC_SECRET_KEY` are required;
    /// `CAPSYNC_PACKET_BUDGET`, `CAPSYNC_HCI_DEVICE`, `CAPSYNC_EXPORT_PATH`
    /// and `CAPSYNC_USE_SUDO` are optional.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let identity = required_var("CAPSYNC_DEVICE_ID")?;
        let key = required_var("CAPSYNC_SECRET_KEY")?;
        let mut config = Self::new(DeviceIdentity::parse(&identity)?, SecretKey::from_hex(&key)?);

        if let Ok(budget) = env::var("CAPSYNC_PACKET_BUDGET") {
            config.packet_budget = budget.trim().parse().map_err(|_| Error::InvalidParameter {
                name: "CAPSYNC_PACKET_BUDGET".to_string(),
                value: budget.clone(),
            })?;
        }
        if let Ok(device) = env::var("CAPSYNC_HCI_DEVICE") {
            config.hci_device = device.trim().to_string();
        }
        if let Ok(path) = env::var("CAPSYNC_EXPORT_PATH") {
            config.export_path = PathBuf::from(path.trim());
        }
        if let Ok(flag) = env::var("CAPSYNC_USE_SUDO") {
            config.use_sudo = parse_bool("CAPSYNC_USE_SUDO", &flag)?;
        }

        debug!(
            "Loaded configuration for {} (budget {}, device {})",
            config.target_identity, config.packet_budget, config.hci_device
        );
        Ok(config)
    }

    /// Set the packet budget.
    pub fn with_packet_budget(mut self, budget: u64) -> Self {
        self.packet_budget = budget;
        self
    }

    /// Set the watchdog interval (at least [`MIN_WATCHDOG_INTERVAL`]).
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval.max(MIN_WATCHDOG_INTERVAL);
        self
    }

    /// Set the button debounce window and polling interval.
    pub fn with_trigger_timing(mut self, poll_interval: Duration, debounce: Duration) -> Self {
        self.trigger_poll_interval = poll_interval;
        self.debounce = debounce;
        self
    }

    /// Set the queue capacity (at least 1).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the HCI device.
    pub fn with_hci_device(mut self, device: impl Into<String>) -> Self {
        self.hci_device = device.into();
        self
    }

    /// Enable or disable the `sudo` prefix.
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    /// Set the export path.
    pub fn with_export_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = path.into();
        self
    }
}

fn required_var(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::InvalidParameter {
        name: name.to_string(),
        value: "<unset>".to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}
