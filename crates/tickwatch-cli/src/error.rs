use thiserror::Error;

use tickwatch_core::{CoreError, WarehouseError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Argument(_) => 2,
            Self::Core(CoreError::Validation(_) | CoreError::InvalidInput { .. }) => 2,
            Self::Core(CoreError::NotFound { .. }) => 3,
            Self::Core(_) => 5,
            Self::Warehouse(_) => 5,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Core(error) => error.code(),
            Self::Warehouse(_) => "store",
            Self::Argument(_) => "invalid_input",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}
