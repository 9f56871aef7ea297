use thiserror::Error;

use crate::cache::{StoreError, drivers::DriverInitError};
use crate::config::LoadError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error(transparent)]
    Settings(#[from] LoadError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("driver setup failed: {0}")]
    Driver(#[from] DriverInitError),
    #[error("cache operation failed: {0}")]
    Operation(String),
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }
}
