//! Timer rule: the pipeline's only external trigger.
//!
//! Emits `UpdateRequired` for the day-ended marker id once at activation
//! and again whenever an hourly tick crosses into a new trading day. The
//! exchange publishes a day's results at 00:45 Moscow time the following
//! day, so "the last day with results" flips at that boundary.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, FixedOffset, Timelike, Utc};
use chrono::NaiveDate;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::bus::EventRule;
use crate::domain::{TableId, Version};
use crate::events::Event;

pub const GROUP: &str = "day_ended";

/// Marker id carried by the trigger events; no table is stored under it.
pub fn id() -> TableId {
    TableId::single(GROUP)
}

const RESULTS_MINUTE: u32 = 45;

/// Moscow is fixed at UTC+3 (no DST since 2014).
fn moscow() -> FixedOffset {
    FixedOffset::east_opt(3 * 3600).expect("offset within bounds")
}

/// The most recent trading day whose results the exchange has published
/// at the given instant.
pub fn last_trading_day(now: DateTime<Utc>) -> NaiveDate {
    let msk = now.with_timezone(&moscow());
    let published = msk.hour() > 0 || msk.minute() >= RESULTS_MINUTE;
    let days_back = if published { 1 } else { 2 };

    msk.date_naive() - Days::new(days_back)
}

pub struct TimerRule {
    tick: Duration,
}

impl TimerRule {
    pub fn new() -> Self {
        Self {
            tick: Duration::from_secs(3600),
        }
    }
}

impl Default for TimerRule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventRule for TimerRule {
    fn name(&self) -> &'static str {
        "timer"
    }

    async fn activate(self: Box<Self>, mut input: mpsc::Receiver<Event>, output: mpsc::Sender<Event>) {
        let mut emissions = JoinSet::new();
        let mut last_emitted = None;

        emit(&mut emissions, &output, &mut last_emitted, last_trading_day(Utc::now()));

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                // The bus copies every event here too; keep draining so
                // fan-out never stalls on the timer.
                received = input.recv() => match received {
                    Some(_) => {}
                    None => break,
                },
                _ = ticker.tick() => {
                    emit(&mut emissions, &output, &mut last_emitted, last_trading_day(Utc::now()));
                }
            }
        }

        while emissions.join_next().await.is_some() {}
        info!(rule = "timer", "rule stopped");
    }
}

/// Sends the trigger from a spawned task: the timer must never block its
/// own intake on the bus accepting the event.
fn emit(
    emissions: &mut JoinSet<()>,
    output: &mpsc::Sender<Event>,
    last_emitted: &mut Option<NaiveDate>,
    day: NaiveDate,
) {
    if *last_emitted == Some(day) {
        return;
    }
    *last_emitted = Some(day);

    let out = output.clone();
    emissions.spawn(async move {
        let _ = out.send(Event::UpdateRequired(Version::new(id(), day))).await;
    });
}
