//! Application context – the single process-wide log sink and client.

use crate::client::{ClientOptions, LpacClient};
use crate::config::{EngineConfig, EngineConfigError};
use crate::env::EnvStore;
use crate::logger::ConsoleLogger;
use crate::platform::TokioProcessRunner;
use crate::traits::ProcessRunner;
use std::sync::Arc;

/// Central context handed to every front-end operation.
///
/// Built once at startup; front-ends share it (or its parts) instead of
/// reaching for globals.
#[derive(Clone)]
pub struct AppContext {
    logger: Arc<ConsoleLogger>,
    client: Arc<LpacClient>,
}

impl AppContext {
    pub fn new(config: &EngineConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self, EngineConfigError> {
        let options = ClientOptions::from_config(config)?;
        let env = config.seed_env()?;
        Ok(Self::with_parts(options, runner, env))
    }

    pub fn with_parts(options: ClientOptions, runner: Arc<dyn ProcessRunner>, env: EnvStore) -> Self {
        let logger = Arc::new(ConsoleLogger::new());
        let client = Arc::new(LpacClient::new(options, runner, logger.clone(), env));
        Self { logger, client }
    }

    /// Context that launches the real engine.
    pub fn default_platform(config: &EngineConfig) -> Result<Self, EngineConfigError> {
        Self::new(config, Arc::new(TokioProcessRunner))
    }

    pub fn logger(&self) -> &Arc<ConsoleLogger> {
        &self.logger
    }

    pub fn client(&self) -> &LpacClient {
        self.client.as_ref()
    }
}
