//! Server settings.
//!
//! Every field has a default so a settings file only needs the values
//! it wants to change. Durations are stored as plain integers for the
//! file format and exposed as [`std::time::Duration`] accessors.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime configuration for the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Address the engine listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Ceiling on concurrently served sessions. Arrivals beyond it wait
    /// unaccepted until a seat frees up.
    #[serde(default = "default_connection_limit")]
    pub connection_limit: usize,

    /// Hard cap for one buffered message, and the outbound chunk size.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// How many bytes of a message the dispatch preview sees.
    #[serde(default = "default_preview_size")]
    pub preview_size: usize,

    /// Pause between outbound chunks, and the dispatch poll window.
    #[serde(default = "default_transmission_delay_ms")]
    pub transmission_delay_ms: u64,

    /// Follow-up window after a message arrives one byte at a time.
    #[serde(default = "default_coalesce_timeout_ms")]
    pub coalesce_timeout_ms: u64,

    /// How long a client gets to answer each login prompt.
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,

    /// Idle time before a session gets a liveness probe.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// How long a probed client has to echo back.
    #[serde(default = "default_probe_reply_timeout_ms")]
    pub probe_reply_timeout_ms: u64,

    /// How long a share receiver has to answer an offer.
    #[serde(default = "default_share_offer_timeout_secs")]
    pub share_offer_timeout_secs: u64,

    /// How long a share receiver has to confirm the payload arrived.
    #[serde(default = "default_share_ack_timeout_secs")]
    pub share_ack_timeout_secs: u64,

    /// Usernames longer than this are truncated, not rejected.
    #[serde(default = "default_username_char_limit")]
    pub username_char_limit: usize,

    /// Failed password or username attempts before disconnection.
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,

    /// Largest accepted share payload.
    #[serde(default = "default_max_share_bytes")]
    pub max_share_bytes: usize,

    /// Connection password. Empty disables the password step.
    #[serde(default)]
    pub server_password: String,

    /// Exact message that shuts the server down. Empty disables it.
    #[serde(default)]
    pub shutdown_phrase: String,

    /// Greeting pushed to every new connection.
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,

    /// Names nobody may claim, on top of whitespace and the shutdown
    /// phrase which are always rejected.
    #[serde(default = "default_illegal_usernames")]
    pub illegal_usernames: Vec<String>,

    /// File extensions refused in share commands, compared without case.
    #[serde(default = "default_illegal_extensions")]
    pub illegal_extensions: Vec<String>,

    /// Accepted presence statuses. The first is assigned at login.
    #[serde(default = "default_legal_statuses")]
    pub legal_statuses: Vec<String>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7475))
}

fn default_connection_limit() -> usize {
    50
}

fn default_buffer_size() -> usize {
    65535
}

fn default_preview_size() -> usize {
    500
}

fn default_transmission_delay_ms() -> u64 {
    10
}

fn default_coalesce_timeout_ms() -> u64 {
    100
}

fn default_login_timeout_secs() -> u64 {
    15
}

fn default_probe_interval_secs() -> u64 {
    15
}

fn default_probe_reply_timeout_ms() -> u64 {
    2500
}

fn default_share_offer_timeout_secs() -> u64 {
    10
}

fn default_share_ack_timeout_secs() -> u64 {
    300
}

fn default_username_char_limit() -> usize {
    20
}

fn default_max_login_attempts() -> u32 {
    5
}

fn default_max_share_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_welcome_message() -> String {
    "Welcome to the chinwag server!".to_string()
}

fn default_illegal_usernames() -> Vec<String> {
    chinwag_protocol::reserved_names()
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn default_illegal_extensions() -> Vec<String> {
    vec!["exe".to_string()]
}

fn default_legal_statuses() -> Vec<String> {
    vec![
        "online".to_string(),
        "busy".to_string(),
        "away".to_string(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            connection_limit: default_connection_limit(),
            buffer_size: default_buffer_size(),
            preview_size: default_preview_size(),
            transmission_delay_ms: default_transmission_delay_ms(),
            coalesce_timeout_ms: default_coalesce_timeout_ms(),
            login_timeout_secs: default_login_timeout_secs(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_reply_timeout_ms: default_probe_reply_timeout_ms(),
            share_offer_timeout_secs: default_share_offer_timeout_secs(),
            share_ack_timeout_secs: default_share_ack_timeout_secs(),
            username_char_limit: default_username_char_limit(),
            max_login_attempts: default_max_login_attempts(),
            max_share_bytes: default_max_share_bytes(),
            server_password: String::new(),
            shutdown_phrase: String::new(),
            welcome_message: default_welcome_message(),
            illegal_usernames: default_illegal_usernames(),
            illegal_extensions: default_illegal_extensions(),
            legal_statuses: default_legal_statuses(),
        }
    }
}

impl Settings {
    pub fn transmission_delay(&self) -> Duration {
        Duration::from_millis(self.transmission_delay_ms)
    }

    pub fn coalesce_timeout(&self) -> Duration {
        Duration::from_millis(self.coalesce_timeout_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_reply_timeout_ms)
    }

    pub fn share_offer_timeout(&self) -> Duration {
        Duration::from_secs(self.share_offer_timeout_secs)
    }

    pub fn share_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.share_ack_timeout_secs)
    }

    /// Default presence assigned at login.
    pub fn default_status(&self) -> &str {
        self.legal_statuses
            .first()
            .map(String::as_str)
            .unwrap_or("online")
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (field, value) in [
            ("connection_limit", self.connection_limit),
            ("buffer_size", self.buffer_size),
            ("preview_size", self.preview_size),
            ("username_char_limit", self.username_char_limit),
            ("login_timeout_secs", self.login_timeout_secs as usize),
            ("max_login_attempts", self.max_login_attempts as usize),
            ("max_share_bytes", self.max_share_bytes),
        ] {
            if value == 0 {
                return Err(SettingsError::ZeroField { field });
            }
        }
        if self.preview_size > self.buffer_size {
            return Err(SettingsError::PreviewTooLarge {
                preview: self.preview_size,
                buffer: self.buffer_size,
            });
        }
        if self.legal_statuses.is_empty() {
            return Err(SettingsError::NoStatuses);
        }
        if self.server_password.chars().count() > self.username_char_limit {
            return Err(SettingsError::PasswordTooLong {
                limit: self.username_char_limit,
            });
        }
        Ok(())
    }
}

/// Settings the engine refuses to start with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("{field} must be greater than zero")]
    ZeroField { field: &'static str },

    #[error("preview_size ({preview}) exceeds buffer_size ({buffer})")]
    PreviewTooLarge { preview: usize, buffer: usize },

    #[error("legal_statuses must name at least one status")]
    NoStatuses,

    #[error("server_password exceeds username_char_limit ({limit})")]
    PasswordTooLong { limit: usize },
}
