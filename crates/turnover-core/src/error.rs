//! Error taxonomy shared by every Turnover crate.

use thiserror::Error;

/// Turnover result alias.
pub type Result<T> = std::result::Result<T, TurnoverError>;

#[derive(Debug, Error)]
pub enum TurnoverError {
    /// Configuration could not be read, parsed or is inconsistent.
    #[error("Config error: {0}")]
    Config(String),

    /// Mailbox or SMTP transport failure.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Persisted state could not be read or written. Never masked.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A booking resolved to no configured property.
    #[error("No property configured for {platform} listing '{listing_id}' (known: {})", known.join(", "))]
    PropertyNotFound {
        platform: String,
        listing_id: String,
        known: Vec<String>,
    },

    /// A booking that violates its own invariants.
    #[error("Invalid booking: {0}")]
    InvalidBooking(String),

    /// The callback presented a token we never issued.
    #[error("Unknown resumption token: {0}")]
    UnknownToken(String),

    /// Malformed callback payload.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TurnoverError {
    /// True for failures caused by the caller of the callback surface.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnknownToken(_) | Self::InvalidResponse(_))
    }
}
