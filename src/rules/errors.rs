//! Central error consumer.
//!
//! Every failure event produced anywhere in the pipeline travels through
//! the bus and lands here, so there is exactly one place that decides
//! what a failure means. Transient causes are logged for the next timer
//! trigger to retry; a fatal cause cancels the application token so the
//! supervisor shuts the process down instead of running on with possibly
//! inconsistent state.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bus::EventRule;
use crate::events::Event;

pub struct ErrorsRule {
    fatal: CancellationToken,
}

impl ErrorsRule {
    /// `fatal` is the application termination token.
    pub fn new(fatal: CancellationToken) -> Self {
        Self { fatal }
    }
}

#[async_trait]
impl EventRule for ErrorsRule {
    fn name(&self) -> &'static str {
        "errors"
    }

    async fn activate(self: Box<Self>, mut input: mpsc::Receiver<Event>, _output: mpsc::Sender<Event>) {
        while let Some(event) = input.recv().await {
            let Event::ErrorOccurred { version, error } = event else {
                continue;
            };

            error!(
                group = version.id().group(),
                name = version.id().name(),
                date = %version.date(),
                %error,
                "update failed",
            );

            if error.is_fatal() {
                error!("fatal failure, requesting application shutdown");
                self.fatal.cancel();
            }
        }
        info!(rule = "errors", "rule stopped");
    }
}
