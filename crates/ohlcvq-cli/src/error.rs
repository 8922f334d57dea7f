use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ohlcvq_core::ConfigError),

    #[error(transparent)]
    Validation(#[from] ohlcvq_core::ValidationError),

    #[error(transparent)]
    Warehouse(#[from] ohlcvq_warehouse::WarehouseError),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Validation(_) => 2,
            Self::Warehouse(_) => 3,
            Self::Runtime(_) | Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
