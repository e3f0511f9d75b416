use thiserror::Error;

use crate::fetch::FetchError;
use crate::notifier::NotifierError;
use crate::store::StoreError;

/// Validation errors for tickers, timestamps, fetched fields and calendar
/// configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ticker cannot be empty")]
    EmptyTicker,
    #[error("ticker length {len} exceeds max {max}")]
    TickerTooLong { len: usize, max: usize },
    #[error("ticker must start with a letter: '{ch}'")]
    TickerInvalidStart { ch: char },
    #[error("ticker contains invalid character '{ch}' at index {index}")]
    TickerInvalidChar { ch: char, index: usize },
    #[error("instrument locator cannot be empty")]
    EmptyLocator,

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("field '{field}' is missing")]
    MissingField { field: &'static str },
    #[error("field '{field}' is not a number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("field '{field}' is not a 'high-low' or 'high/low' pair: '{value}'")]
    InvalidRange { field: &'static str, value: String },
    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("field '{field}' must be strictly positive")]
    NonPositiveValue { field: &'static str },

    #[error("unknown weekday '{value}'")]
    InvalidWeekday { value: String },
    #[error("invalid trading time '{value}', expected HH:MM")]
    InvalidTradingTime { value: String },
    #[error("trading window must open before it closes ({open} >= {close})")]
    EmptyTradingWindow { open: String, close: String },
    #[error("invalid UTC offset '{value}', expected +HH:MM")]
    InvalidUtcOffset { value: String },
}

/// Top-level error type for engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Adapter(#[from] FetchError),

    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error(transparent)]
    Notifier(#[from] NotifierError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, e.g. `fetch.unavailable`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Adapter(error) => error.code(),
            Self::NotFound { .. } => "not_found",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Notifier(error) => error.code(),
            Self::Store(_) => "store",
            Self::Config(_) => "config",
        }
    }

    /// Whether the same request may succeed later without operator action.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Adapter(error) => error.retryable(),
            Self::Notifier(_) | Self::Store(_) => true,
            Self::Validation(_)
            | Self::NotFound { .. }
            | Self::InvalidInput { .. }
            | Self::Config(_) => false,
        }
    }

    /// Whether the failure is connection-level and should end the current cycle.
    pub const fn is_fatal_to_cycle(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Config(_))
    }
}
