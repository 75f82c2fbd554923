//! Turnover configuration system.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TurnoverError};
use crate::types::Property;

/// Root configuration. Loaded once per run, then shared read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnoverConfig {
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    /// Extra sender domains per platform, merged into the parser allow-list.
    #[serde(default)]
    pub platforms: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl TurnoverConfig {
    /// Load config from the default path (~/.turnover/config.toml).
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load config from a specific path and validate it.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TurnoverError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml(&content)?;
        if config.mail.password.is_empty()
            && let Ok(password) = std::env::var("TURNOVER_MAIL_PASSWORD")
        {
            config.mail.password = password;
        }
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TurnoverError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.workflow.cleaning_time()?;
        for property in &self.properties {
            if property.id.trim().is_empty() {
                return Err(TurnoverError::Config("property with empty id".into()));
            }
            if let Some(cleaner) = property.cleaners.iter().find(|c| c.rank == 0) {
                return Err(TurnoverError::Config(format!(
                    "property '{}': cleaner '{}' needs a positive rank",
                    property.id, cleaner.name
                )));
            }
            property
                .metadata
                .timezone
                .parse::<chrono_tz::Tz>()
                .map_err(|_| {
                    TurnoverError::Config(format!(
                        "property '{}': invalid timezone '{}'",
                        property.id, property.metadata.timezone
                    ))
                })?;
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Turnover home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".turnover")
    }
}

/// Mailbox (IMAP) and outbound (SMTP) account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_imap_host")]
    pub imap_host: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "bool_true")]
    pub unread_only: bool,
    #[serde(default = "bool_true")]
    pub mark_as_read: bool,
}

fn default_imap_host() -> String {
    "imap.gmail.com".into()
}
fn default_imap_port() -> u16 {
    993
}
fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_mailbox() -> String {
    "INBOX".into()
}
fn bool_true() -> bool {
    true
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            imap_host: default_imap_host(),
            imap_port: default_imap_port(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            email: String::new(),
            password: String::new(),
            display_name: None,
            mailbox: default_mailbox(),
            unread_only: true,
            mark_as_read: true,
        }
    }
}

/// Which emails the mail collaborator should hand us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_sender_patterns")]
    pub sender_patterns: Vec<String>,
    #[serde(default = "default_subject_patterns")]
    pub subject_patterns: Vec<String>,
}

fn default_sender_patterns() -> Vec<String> {
    vec![
        "airbnb.com".into(),
        "vrbo.com".into(),
        "homeaway.com".into(),
        "booking.com".into(),
    ]
}

fn default_subject_patterns() -> Vec<String> {
    vec![
        "Reservation confirmed".into(),
        "New booking".into(),
        "Booking confirmation".into(),
    ]
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sender_patterns: default_sender_patterns(),
            subject_patterns: default_subject_patterns(),
        }
    }
}

/// Escalation workflow tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// How long a cleaner has to answer before we move on.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_mins: u64,
    /// Local civil time of the cleaning on checkout day, `HH:MM`.
    #[serde(default = "default_cleaning_time")]
    pub cleaning_time: String,
    #[serde(default = "default_cleaning_duration")]
    pub cleaning_duration_mins: u32,
    /// Send attempts per cleaner before treating them as unreachable.
    #[serde(default = "default_retry_budget")]
    pub dispatch_retry_budget: u32,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// How long a run may sit between a transition and its next send before
    /// the sweep treats the send as lost and redoes it.
    #[serde(default = "default_dispatch_grace")]
    pub dispatch_grace_mins: u64,
    /// Public base URL the yes/no links point at.
    #[serde(default = "default_callback_base")]
    pub callback_base_url: String,
}

fn default_response_timeout() -> u64 {
    24 * 60
}
fn default_cleaning_time() -> String {
    "11:00".into()
}
fn default_cleaning_duration() -> u32 {
    180
}
fn default_retry_budget() -> u32 {
    3
}
fn default_sweep_interval() -> u64 {
    300
}
fn default_dispatch_grace() -> u64 {
    10
}
fn default_callback_base() -> String {
    "http://127.0.0.1:8787".into()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            response_timeout_mins: default_response_timeout(),
            cleaning_time: default_cleaning_time(),
            cleaning_duration_mins: default_cleaning_duration(),
            dispatch_retry_budget: default_retry_budget(),
            sweep_interval_secs: default_sweep_interval(),
            dispatch_grace_mins: default_dispatch_grace(),
            callback_base_url: default_callback_base(),
        }
    }
}

impl WorkflowConfig {
    pub fn cleaning_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.cleaning_time.trim(), "%H:%M").map_err(|e| {
            TurnoverError::Config(format!(
                "workflow.cleaning_time '{}' is not HH:MM: {e}",
                self.cleaning_time
            ))
        })
    }

    pub fn response_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.response_timeout_mins as i64)
    }

    pub fn dispatch_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.dispatch_grace_mins as i64)
    }
}

/// Callback HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8787
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.turnover/turnover.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).to_string())
    }
}
