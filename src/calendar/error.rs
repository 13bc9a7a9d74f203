use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("plan not found: {key}")]
    NotFound { key: String },

    #[error("{field} must be a yyyy-MM-dd date, got {value:?}")]
    InvalidDate { field: String, value: String },

    #[error("shifting {date} by {count} days leaves the calendar")]
    DateOutOfRange { date: String, count: u32 },

    #[error("{field} must be non-empty and must not contain \"__\"")]
    InvalidComponent { field: String },

    #[error("failed to read plans: {0:#}")]
    StoreRead(anyhow::Error),

    #[error("failed to write plans: {0:#}")]
    StoreWrite(anyhow::Error),
}

impl CalendarError {
    /// Wire error code used in IPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidDate { .. } | Self::DateOutOfRange { .. } | Self::InvalidComponent { .. } => {
                "bad_params"
            }
            Self::StoreRead(_) => "db_query_failed",
            Self::StoreWrite(_) => "db_commit_failed",
        }
    }
}
