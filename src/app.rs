//! Application lifecycle: wiring and supervision.
//!
//! Modules start in dependency order (telemetry, store, bus, server) and
//! stop in reverse, each phase bounded by its configured timeout. The
//! process runs until SIGINT/SIGTERM or until the errors rule cancels the
//! termination token on a fatal failure; either way teardown is the same
//! ordered shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{Bus, EventBus};
use crate::config::Config;
use crate::iss::IssClient;
use crate::ports::{Module, ModuleError};
use crate::rules::{cpi, errors, indexes, timer, trading_dates, usd};
use crate::server::Server;
use crate::stats::StatsClient;
use crate::store::{DocStore, StoreModule};
use crate::telemetry::Telemetry;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{module}: {source}")]
    Module {
        module: &'static str,
        source: ModuleError,
    },

    #[error("start phase timed out after {0:?}")]
    StartTimeout(Duration),

    #[error("one or more modules failed to shut down cleanly")]
    ShutdownFailed,

    #[error("signal handler: {0}")]
    Signal(String),
}

pub struct App {
    start_timeout: Duration,
    shutdown_timeout: Duration,
    modules: Vec<Box<dyn Module>>,
    termination: CancellationToken,
    started: usize,
}

/// Builds the fully wired application from configuration.
pub fn build(cfg: &Config) -> anyhow::Result<App> {
    let addr: SocketAddr = cfg.server_addr.parse()?;
    let termination = CancellationToken::new();

    let store = Arc::new(DocStore::new());
    let iss = Arc::new(IssClient::new(cfg.iss_url.clone())?);
    let stats = Arc::new(StatsClient::new(cfg.cpi_url.clone())?);
    let deadline = cfg.event_deadline();

    let mut bus = EventBus::new();
    bus.register(Box::new(errors::ErrorsRule::new(termination.clone())));
    bus.register(Box::new(timer::TimerRule::new()));
    bus.register(trading_dates::rule(store.clone(), iss.clone(), deadline));
    bus.register(usd::rule(store.clone(), iss.clone(), deadline));
    bus.register(indexes::rule(store.clone(), iss, deadline));
    bus.register(cpi::rule(store.clone(), stats, deadline));

    let modules: Vec<Box<dyn Module>> = vec![
        Box::new(Telemetry::new(cfg.log_filter.clone())),
        Box::new(StoreModule::new(store.clone())),
        Box::new(Bus::new(bus)),
        Box::new(Server::new(addr, store, cfg.request_timeout())),
    ];

    Ok(App::new(
        cfg.start_timeout(),
        cfg.shutdown_timeout(),
        modules,
        termination,
    ))
}

impl App {
    pub fn new(
        start_timeout: Duration,
        shutdown_timeout: Duration,
        modules: Vec<Box<dyn Module>>,
        termination: CancellationToken,
    ) -> Self {
        Self {
            start_timeout,
            shutdown_timeout,
            modules,
            termination,
            started: 0,
        }
    }

    /// Token the errors rule cancels to request a shutdown; cancelling it
    /// from anywhere stops the application.
    pub fn termination(&self) -> CancellationToken {
        self.termination.clone()
    }

    pub async fn run(mut self) -> Result<(), AppError> {
        if let Err(err) = self.start_phase().await {
            warn!(%err, "start failed, rolling back");
            self.shutdown_phase().await;
            return Err(err);
        }
        info!("application started");

        let waited = wait_for_termination(self.termination.clone()).await;
        info!("application stopping");

        let clean = self.shutdown_phase().await;
        waited?;

        if !clean {
            return Err(AppError::ShutdownFailed);
        }

        Ok(())
    }

    async fn start_phase(&mut self) -> Result<(), AppError> {
        let budget = self.start_timeout;
        let outcome = timeout(
            budget,
            Self::start_modules(&mut self.modules, &mut self.started),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(AppError::StartTimeout(budget)),
        }
    }

    async fn start_modules(
        modules: &mut [Box<dyn Module>],
        started: &mut usize,
    ) -> Result<(), AppError> {
        for module in modules.iter_mut() {
            let name = module.name();
            module
                .start()
                .await
                .map_err(|source| AppError::Module { module: name, source })?;
            info!(module = name, "module started");
            *started += 1;
        }

        Ok(())
    }

    /// Stops every started module in reverse order; returns whether all
    /// of them stopped cleanly within their budget.
    async fn shutdown_phase(&mut self) -> bool {
        let mut clean = true;

        for module in self.modules[..self.started].iter_mut().rev() {
            let name = module.name();
            match timeout(self.shutdown_timeout, module.shutdown()).await {
                Ok(Ok(())) => info!(module = name, "module stopped"),
                Ok(Err(err)) => {
                    warn!(module = name, %err, "module shutdown failed");
                    clean = false;
                }
                Err(_) => {
                    warn!(
                        module = name,
                        budget = ?self.shutdown_timeout,
                        "module shutdown timed out",
                    );
                    clean = false;
                }
            }
        }

        info!("application stopped");
        clean
    }
}

async fn wait_for_termination(token: CancellationToken) -> Result<(), AppError> {
    let mut terminate =
        unix_signal(SignalKind::terminate()).map_err(|err| AppError::Signal(err.to_string()))?;

    tokio::select! {
        () = token.cancelled() => {}
        _ = signal::ctrl_c() => token.cancel(),
        _ = terminate.recv() => token.cancel(),
    }

    Ok(())
}
