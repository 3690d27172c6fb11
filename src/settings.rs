//! Configuration loading.
//!
//! Settings live under a top-level `"Hl7"` key in a JSON document (matching
//! the shape of the original .NET reference's `appsettings.json` section),
//! deserialized through a raw/optional layer and then validated into an
//! immutable [`Settings`], the same two-layer pattern
//! `services/forwarder/src/config.rs` uses for its TOML config. Any
//! settings key can be overridden by an `HL7_<UPPER_SNAKE_KEY>`
//! environment variable, applied after JSON parsing and before validation.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Operating mode: pure listener, pure outbound client, or bidirectional
/// proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Client,
    Proxy,
}

/// Which side the proxy listens on vs. dials out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyDirection {
    /// Proxy listens for the analyzer, dials out to the LIS.
    ListenerToClient,
    /// Proxy listens for the LIS, dials out to the analyzer.
    ClientToListener,
}

/// Immutable settings, constructed once at start-up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub client_host: String,
    pub client_port: u16,
    pub sending_application: String,
    pub sending_facility: String,
    pub receiving_application: String,
    pub receiving_facility: String,
    pub log_file_path: String,
    pub allowed_events: Vec<String>,
    pub ack_mode: String,
    pub message_date_time_format: String,
    pub disconnect_after_ack: bool,
    pub mode: Mode,
    pub proxy_direction: ProxyDirection,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value for '{field}': {value}")]
    InvalidValue { field: String, value: String },
}

#[derive(Debug, Deserialize, Default)]
struct RawDocument {
    #[serde(rename = "Hl7")]
    hl7: Option<RawHl7>,
}

#[derive(Debug, Deserialize, Default)]
struct RawHl7 {
    #[serde(rename = "Port")]
    port: Option<u16>,
    #[serde(rename = "ClientHost")]
    client_host: Option<String>,
    #[serde(rename = "ClientPort")]
    client_port: Option<u16>,
    #[serde(rename = "SendingApplication")]
    sending_application: Option<String>,
    #[serde(rename = "SendingFacility")]
    sending_facility: Option<String>,
    #[serde(rename = "ReceivingApplication")]
    receiving_application: Option<String>,
    #[serde(rename = "ReceivingFacility")]
    receiving_facility: Option<String>,
    #[serde(rename = "LogFilePath")]
    log_file_path: Option<String>,
    #[serde(rename = "AllowedEvents")]
    allowed_events: Option<Vec<String>>,
    #[serde(rename = "AckMode")]
    ack_mode: Option<String>,
    #[serde(rename = "MessageDateTimeFormat")]
    message_date_time_format: Option<String>,
    #[serde(rename = "DisconnectAfterAck")]
    disconnect_after_ack: Option<bool>,
    #[serde(rename = "Mode")]
    mode: Option<String>,
    #[serde(rename = "ProxyDirection")]
    proxy_direction: Option<String>,
}

/// Load settings from a JSON config file on disk, applying environment
/// variable overrides.
pub fn load(path: &Path) -> Result<Settings, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_from_str(&text)
}

/// Load settings from a JSON string (used directly by tests).
pub fn load_from_str(text: &str) -> Result<Settings, ConfigError> {
    let raw: RawDocument = serde_json::from_str(text)?;
    let mut hl7 = raw.hl7.unwrap_or_default();
    apply_env_overrides(&mut hl7);
    validate(hl7)
}

fn apply_env_overrides(raw: &mut RawHl7) {
    use std::env;

    if let Ok(v) = env::var("HL7_PORT") {
        if let Ok(p) = v.parse() {
            raw.port = Some(p);
        }
    }
    if let Ok(v) = env::var("HL7_CLIENT_HOST") {
        if !v.is_empty() {
            raw.client_host = Some(v);
        }
    }
    if let Ok(v) = env::var("HL7_CLIENT_PORT") {
        if let Ok(p) = v.parse() {
            raw.client_port = Some(p);
        }
    }
    if let Ok(v) = env::var("HL7_SENDING_APPLICATION") {
        if !v.is_empty() {
            raw.sending_application = Some(v);
        }
    }
    if let Ok(v) = env::var("HL7_SENDING_FACILITY") {
        if !v.is_empty() {
            raw.sending_facility = Some(v);
        }
    }
    if let Ok(v) = env::var("HL7_RECEIVING_APPLICATION") {
        if !v.is_empty() {
            raw.receiving_application = Some(v);
        }
    }
    if let Ok(v) = env::var("HL7_RECEIVING_FACILITY") {
        if !v.is_empty() {
            raw.receiving_facility = Some(v);
        }
    }
    if let Ok(v) = env::var("HL7_LOG_FILE_PATH") {
        if !v.is_empty() {
            raw.log_file_path = Some(v);
        }
    }
    if let Ok(v) = env::var("HL7_ALLOWED_EVENTS") {
        if !v.is_empty() {
            raw.allowed_events = Some(v.split(',').map(|s| s.trim().to_owned()).collect());
        }
    }
    if let Ok(v) = env::var("HL7_ACK_MODE") {
        if !v.is_empty() {
            raw.ack_mode = Some(v);
        }
    }
    if let Ok(v) = env::var("HL7_MESSAGE_DATE_TIME_FORMAT") {
        if !v.is_empty() {
            raw.message_date_time_format = Some(v);
        }
    }
    if let Ok(v) = env::var("HL7_DISCONNECT_AFTER_ACK") {
        if let Ok(b) = v.parse() {
            raw.disconnect_after_ack = Some(b);
        }
    }
    if let Ok(v) = env::var("HL7_MODE") {
        if !v.is_empty() {
            raw.mode = Some(v);
        }
    }
    if let Ok(v) = env::var("HL7_PROXY_DIRECTION") {
        if !v.is_empty() {
            raw.proxy_direction = Some(v);
        }
    }
}

fn validate(raw: RawHl7) -> Result<Settings, ConfigError> {
    let mode = match raw.mode.as_deref().unwrap_or("Server") {
        "Server" => Mode::Server,
        "Client" => Mode::Client,
        "Proxy" => Mode::Proxy,
        other => {
            return Err(ConfigError::InvalidValue {
                field: "Mode".to_owned(),
                value: other.to_owned(),
            })
        }
    };
    let proxy_direction = match raw.proxy_direction.as_deref().unwrap_or("ListenerToClient") {
        "ListenerToClient" => ProxyDirection::ListenerToClient,
        "ClientToListener" => ProxyDirection::ClientToListener,
        other => {
            return Err(ConfigError::InvalidValue {
                field: "ProxyDirection".to_owned(),
                value: other.to_owned(),
            })
        }
    };

    Ok(Settings {
        port: raw.port.unwrap_or(5100),
        client_host: raw.client_host.unwrap_or_else(|| "127.0.0.1".to_owned()),
        client_port: raw.client_port.unwrap_or(5200),
        sending_application: raw.sending_application.unwrap_or_default(),
        sending_facility: raw.sending_facility.unwrap_or_default(),
        receiving_application: raw.receiving_application.unwrap_or_default(),
        receiving_facility: raw.receiving_facility.unwrap_or_default(),
        log_file_path: raw.log_file_path.unwrap_or_default(),
        allowed_events: raw.allowed_events.unwrap_or_default(),
        ack_mode: raw.ack_mode.unwrap_or_else(|| "AA".to_owned()),
        message_date_time_format: raw
            .message_date_time_format
            .unwrap_or_else(|| "yyyy-MM-dd HH:mm:ss".to_owned()),
        disconnect_after_ack: raw.disconnect_after_ack.unwrap_or(false),
        mode,
        proxy_direction,
    })
}
