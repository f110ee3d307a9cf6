//! Structured logging as a lifecycle module, so log output is available
//! from the first module start and flushed until the last shutdown.

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use crate::ports::{Module, ModuleError};

pub struct Telemetry {
    filter: String,
}

impl Telemetry {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
        }
    }
}

#[async_trait]
impl Module for Telemetry {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    async fn start(&mut self) -> Result<(), ModuleError> {
        let filter = EnvFilter::try_new(&self.filter)
            .map_err(|err| ModuleError::Start(format!("bad log filter {:?}: {err}", self.filter)))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| ModuleError::Start(err.to_string()))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ModuleError> {
        // The fmt writer flushes per event; nothing is buffered.
        Ok(())
    }
}
