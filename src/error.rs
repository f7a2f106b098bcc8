// Error taxonomy for the polling pipeline
//
// Item-level errors (Parse, Image) are contained to the item that caused
// them; call-level errors (Fetch, Auth) empty the current cycle. Nothing
// here is ever allowed to escape a sensor's poll loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SensorError {
    /// A date string from an upstream payload could not be parsed.
    /// Callers drop the occurrence and continue.
    #[error("failed to parse date '{value}': {reason}")]
    Parse { value: String, reason: String },

    /// The primary collection call failed (non-200, timeout, transport).
    /// The cycle's output becomes empty and the sensor is marked unavailable.
    #[error("fetch from {endpoint} failed: {reason}")]
    Fetch { endpoint: String, reason: String },

    /// An image download/store failed. The record is kept without the image.
    #[error("image download failed: {0}")]
    Image(String),

    /// Credential acquisition or refresh failed. Aborts the authenticated
    /// fetch for this cycle only.
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl SensorError {
    pub fn fetch(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(value: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
