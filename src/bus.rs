//! Event bus: single point of fan-in/fan-out for all rules.
//!
//! Every rule writes the events it produces into one shared inbox; the
//! bus copies each inbox event to every rule's private input queue before
//! taking the next one. All queues are rendezvous-sized (capacity 1), so
//! a slow rule throttles the whole bus and a slow bus throttles every
//! producer. That blocking fan-out is the backpressure mechanism: events
//! are never buffered beyond one in flight per edge and never dropped.
//!
//! The bus performs no business logic. The only failure it can report is
//! finding events still in flight when asked to stop.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::Event;
use crate::ports::{Module, ModuleError};

/// A reactive unit the bus routes events through.
///
/// `activate` runs until the input channel closes; the rule must keep
/// draining its input (every rule sees every event) and may push new
/// events into `output` at any time. Work accepted before the input
/// closed must finish before `activate` returns.
#[async_trait]
pub trait EventRule: Send {
    fn name(&self) -> &'static str;

    async fn activate(self: Box<Self>, input: mpsc::Receiver<Event>, output: mpsc::Sender<Event>);
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("unprocessed events at shutdown: count {count}")]
    Unprocessed { count: usize },
}

/// Fan-in/fan-out router over a fixed set of rules.
pub struct EventBus {
    rules: Vec<Box<dyn EventRule>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn register(&mut self, rule: Box<dyn EventRule>) {
        self.rules.push(rule);
    }

    /// Runs until cancellation or until every rule has exited.
    ///
    /// On cancellation the bus stops taking events into fan-out, closes
    /// the rule inputs once the in-flight delivery completes, then drains
    /// whatever the winding-down rules still push into the inbox. Drained
    /// events are a shutdown correctness signal, not a silent drop: if any
    /// were found, `run` returns [`BusError::Unprocessed`].
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BusError> {
        let (inbox_tx, mut inbox_rx) = mpsc::channel::<Event>(1);

        let rules = self.rules;
        let mut consumers = Vec::with_capacity(rules.len());
        let mut rule_tasks = JoinSet::new();
        for rule in rules {
            let (consumer_tx, consumer_rx) = mpsc::channel::<Event>(1);
            consumers.push(consumer_tx);

            let out = inbox_tx.clone();
            info!(rule = rule.name(), "rule started");
            rule_tasks.spawn(rule.activate(consumer_rx, out));
        }
        // Only rules hold inbox senders now: once they all exit, the inbox
        // closes and the drain loop below terminates.
        drop(inbox_tx);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                received = inbox_rx.recv() => match received {
                    Some(event) => fan_out(&consumers, event).await,
                    None => break,
                },
            }
        }

        // Close every rule's input; rules finish in-flight work and exit.
        drop(consumers);

        let mut unprocessed = 0usize;
        while let Some(event) = inbox_rx.recv().await {
            let version = event.version();
            warn!(
                kind = event.kind(),
                group = version.id().group(),
                name = version.id().name(),
                date = %version.date(),
                "unprocessed event",
            );
            unprocessed += 1;
        }

        while rule_tasks.join_next().await.is_some() {}

        if unprocessed != 0 {
            return Err(BusError::Unprocessed { count: unprocessed });
        }

        Ok(())
    }
}

async fn fan_out(consumers: &[mpsc::Sender<Event>], event: Event) {
    let version = event.version();
    info!(
        kind = event.kind(),
        group = version.id().group(),
        name = version.id().name(),
        date = %version.date(),
        "processing event",
    );

    for consumer in consumers {
        // A send only fails if the rule exited early; the remaining
        // rules still get their copy.
        let _ = consumer.send(event.clone()).await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle wrapper running the bus as an application module.
pub struct Bus {
    bus: Option<EventBus>,
    shutdown: CancellationToken,
    handle: Option<tokio::task::JoinHandle<Result<(), BusError>>>,
}

impl Bus {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus: Some(bus),
            shutdown: CancellationToken::new(),
            handle: None,
        }
    }
}

#[async_trait]
impl Module for Bus {
    fn name(&self) -> &'static str {
        "event_bus"
    }

    async fn start(&mut self) -> Result<(), ModuleError> {
        let bus = self
            .bus
            .take()
            .ok_or_else(|| ModuleError::Start("bus already started".into()))?;

        self.handle = Some(tokio::spawn(bus.run(self.shutdown.clone())));

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ModuleError> {
        self.shutdown.cancel();

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle
            .await
            .map_err(|err| ModuleError::Shutdown(format!("bus task panicked: {err}")))?
            .map_err(|err| ModuleError::Shutdown(err.to_string()))
    }
}
