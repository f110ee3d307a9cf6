//! Generic update rule: the reactive "something changed upstream, refresh
//! this table" pattern implemented once and parameterized per table kind.
//!
//! A rule combines a selector, a gateway, a validator and a repository
//! into one unit the bus can activate. For every event the selector picks
//! the table ids that must react; every id is processed concurrently and
//! independently: load stored rows, fetch candidates from the provider,
//! validate, persist, and only after the write returns emit
//! `UpdateCompleted`. That persist-before-emit ordering is the unit-of-work
//! invariant: no downstream rule ever observes a completion for data that
//! is not yet durably stored.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::info;

use crate::bus::EventRule;
use crate::domain::{Table, Version};
use crate::events::{Event, UpdateError};
use crate::ports::{Repository, Selector, TableGateway, Validator};

/// How fetched rows reach storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    /// Extend the stored rows. The first fetched row is the overlap
    /// sentinel already present in storage and is skipped, except when
    /// the table is still empty and there is nothing to overlap with.
    Append,
    /// Overwrite the stored rows entirely.
    Replace,
}

pub struct UpdateRule<R: 'static> {
    core: Arc<RuleCore<R>>,
}

struct RuleCore<R: 'static> {
    name: &'static str,
    selector: Box<dyn Selector>,
    gateway: Arc<dyn TableGateway<R>>,
    validator: Validator<R>,
    repo: Arc<dyn Repository<R>>,
    mode: PersistMode,
    /// Bounds the load/fetch/validate stage of one unit of work. A write
    /// that has started is never raced against the clock.
    deadline: Duration,
}

impl<R: Send + Sync + 'static> UpdateRule<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &'static str,
        selector: Box<dyn Selector>,
        gateway: Arc<dyn TableGateway<R>>,
        validator: Validator<R>,
        repo: Arc<dyn Repository<R>>,
        mode: PersistMode,
        deadline: Duration,
    ) -> Self {
        Self {
            core: Arc::new(RuleCore {
                name,
                selector,
                gateway,
                validator,
                repo,
                mode,
                deadline,
            }),
        }
    }
}

#[async_trait]
impl<R: Send + Sync + 'static> EventRule for UpdateRule<R> {
    fn name(&self) -> &'static str {
        self.core.name
    }

    async fn activate(self: Box<Self>, mut input: mpsc::Receiver<Event>, output: mpsc::Sender<Event>) {
        let core = self.core;
        let mut tasks = JoinSet::new();

        // Intake never blocks on a previous event's completion: every
        // event is handled in its own task.
        while let Some(event) = input.recv().await {
            let core = Arc::clone(&core);
            let out = output.clone();
            tasks.spawn(async move { core.handle_event(out, event).await });
        }

        // Input closed: let in-flight units of work finish before exiting.
        while tasks.join_next().await.is_some() {}
        info!(rule = core.name, "rule stopped");
    }
}

impl<R: Send + Sync + 'static> RuleCore<R> {
    async fn handle_event(self: Arc<Self>, out: mpsc::Sender<Event>, event: Event) {
        let ids = match self.selector.select(&event) {
            Ok(ids) => ids,
            Err(error) => {
                let _ = out
                    .send(Event::ErrorOccurred {
                        version: event.version().clone(),
                        error,
                    })
                    .await;
                return;
            }
        };

        let date = event.version().date();
        let mut tasks = JoinSet::new();
        for id in ids {
            let core = Arc::clone(&self);
            let out = out.clone();
            let version = Version::new(id, date);

            // Ids of the same event run concurrently; their failures are
            // independent.
            tasks.spawn(async move {
                if let Some(produced) = core.update_to_version(version).await {
                    let _ = out.send(produced).await;
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    }

    async fn update_to_version(&self, version: Version) -> Option<Event> {
        match self.try_update(&version).await {
            // Nothing new upstream: the common steady-state case ends
            // silently.
            Ok(false) => None,
            Ok(true) => Some(Event::UpdateCompleted(version)),
            Err(error) => Some(Event::ErrorOccurred { version, error }),
        }
    }

    async fn try_update(&self, version: &Version) -> Result<bool, UpdateError> {
        let staged = timeout(self.deadline, self.stage(version))
            .await
            .map_err(|_| UpdateError::DeadlineExceeded {
                seconds: self.deadline.as_secs(),
            })??;

        let Some(rows) = staged else {
            return Ok(false);
        };

        match self.mode {
            PersistMode::Append => self.repo.append(version, &rows).await,
            PersistMode::Replace => self.repo.replace(version, &rows).await,
        }
        .map_err(|err| UpdateError::Persistence(err.to_string()))?;

        Ok(true)
    }

    /// Load, fetch and validate; returns the rows ready for persistence,
    /// or `None` when the provider has nothing new.
    async fn stage(&self, version: &Version) -> Result<Option<Vec<R>>, UpdateError> {
        let table = self
            .repo
            .get(version.id())
            .await
            .map_err(|err| UpdateError::Persistence(err.to_string()))?;

        let mut rows = self
            .gateway
            .fetch(&table, version.date())
            .await
            .map_err(|err| UpdateError::Fetch(err.to_string()))?;

        if !self.has_new_rows(&table, &rows) {
            return Ok(None);
        }

        (self.validator)(&table, &rows).map_err(|err| UpdateError::Validation(err.to_string()))?;

        if self.mode == PersistMode::Append && !table.is_empty() {
            // Row 0 is the overlap sentinel, already in storage.
            rows.remove(0);
        }

        Ok(Some(rows))
    }

    fn has_new_rows(&self, table: &Table<R>, rows: &[R]) -> bool {
        if rows.is_empty() {
            return false;
        }
        // In append mode a lone sentinel row means the provider is exactly
        // where storage already is.
        if self.mode == PersistMode::Append && !table.is_empty() && rows.len() == 1 {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DateRange, TableId};
    use crate::ports::{GatewayError, RepoError, ValidationError};
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn range(from: (i32, u32, u32), till: (i32, u32, u32)) -> DateRange {
        DateRange {
            from: date(from.0, from.1, from.2),
            till: date(till.0, till.1, till.2),
        }
    }

    fn ok_validator(_: &Table<DateRange>, _: &[DateRange]) -> Result<(), ValidationError> {
        Ok(())
    }

    /// In-memory repository recording every call in order; writes pause
    /// before committing so ordering races would be caught.
    struct TraceRepo {
        tables: Mutex<HashMap<TableId, Vec<DateRange>>>,
        trace: Mutex<Vec<String>>,
        write_delay: Duration,
    }

    impl TraceRepo {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                tables: Mutex::new(HashMap::new()),
                trace: Mutex::new(Vec::new()),
                write_delay: Duration::ZERO,
            })
        }

        fn with_slow_writes() -> Arc<Self> {
            Arc::new(Self {
                tables: Mutex::new(HashMap::new()),
                trace: Mutex::new(Vec::new()),
                write_delay: Duration::from_millis(50),
            })
        }

        fn preload(self: &Arc<Self>, id: &TableId, rows: Vec<DateRange>) {
            self.tables.lock().unwrap().insert(id.clone(), rows);
        }

        fn rows(&self, id: &TableId) -> Vec<DateRange> {
            self.tables.lock().unwrap().get(id).cloned().unwrap_or_default()
        }

        fn trace(&self) -> Vec<String> {
            self.trace.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Repository<DateRange> for TraceRepo {
        async fn get(&self, id: &TableId) -> Result<Table<DateRange>, RepoError> {
            self.trace.lock().unwrap().push(format!("get {id}"));
            let rows = self.tables.lock().unwrap().get(id).cloned().unwrap_or_default();
            Ok(Table::new(id.clone(), rows))
        }

        async fn append(&self, version: &Version, rows: &[DateRange]) -> Result<(), RepoError> {
            tokio::time::sleep(self.write_delay).await;
            self.tables
                .lock()
                .unwrap()
                .entry(version.id().clone())
                .or_default()
                .extend_from_slice(rows);
            self.trace
                .lock()
                .unwrap()
                .push(format!("append {} rows {}", version.id(), rows.len()));
            Ok(())
        }

        async fn replace(&self, version: &Version, rows: &[DateRange]) -> Result<(), RepoError> {
            tokio::time::sleep(self.write_delay).await;
            self.tables
                .lock()
                .unwrap()
                .insert(version.id().clone(), rows.to_vec());
            self.trace
                .lock()
                .unwrap()
                .push(format!("replace {} rows {}", version.id(), rows.len()));
            Ok(())
        }
    }

    /// Gateway emulating the provider: returns its rows whenever storage
    /// lags behind them, the way the calendar gateway detects change.
    struct CalendarGateway {
        provider: Mutex<Vec<DateRange>>,
        fetched_dates: Mutex<Vec<(TableId, NaiveDate)>>,
        delay: Duration,
    }

    impl CalendarGateway {
        fn new(provider: Vec<DateRange>) -> Arc<Self> {
            Arc::new(Self {
                provider: Mutex::new(provider),
                fetched_dates: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }

        fn slow(provider: Vec<DateRange>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                provider: Mutex::new(provider),
                fetched_dates: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn set_provider(&self, rows: Vec<DateRange>) {
            *self.provider.lock().unwrap() = rows;
        }
    }

    #[async_trait]
    impl TableGateway<DateRange> for CalendarGateway {
        async fn fetch(
            &self,
            table: &Table<DateRange>,
            as_of: NaiveDate,
        ) -> Result<Vec<DateRange>, GatewayError> {
            tokio::time::sleep(self.delay).await;
            self.fetched_dates
                .lock()
                .unwrap()
                .push((table.id().clone(), as_of));

            let provider = self.provider.lock().unwrap().clone();
            match (table.last_row(), provider.last()) {
                (_, None) => Ok(Vec::new()),
                (None, Some(_)) => Ok(provider),
                (Some(stored), Some(fresh)) if stored.till < fresh.till => Ok(provider),
                _ => Ok(Vec::new()),
            }
        }
    }

    struct FixedSelector(Vec<TableId>);

    impl Selector for FixedSelector {
        fn select(&self, _event: &Event) -> Result<Vec<TableId>, UpdateError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSelector;

    impl Selector for FailingSelector {
        fn select(&self, _event: &Event) -> Result<Vec<TableId>, UpdateError> {
            Err(UpdateError::Selection("unrecognized event".into()))
        }
    }

    fn trigger(date_parts: (i32, u32, u32)) -> Event {
        Event::UpdateRequired(Version::new(
            TableId::single("day_ended"),
            date(date_parts.0, date_parts.1, date_parts.2),
        ))
    }

    /// Feeds events to the rule, closes its input, and returns everything
    /// it emitted.
    async fn drive(rule: Box<dyn EventRule>, events: Vec<Event>) -> Vec<Event> {
        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(64);

        let handle = tokio::spawn(rule.activate(in_rx, out_tx));
        for event in events {
            in_tx.send(event).await.unwrap();
        }
        drop(in_tx);
        handle.await.unwrap();

        let mut produced = Vec::new();
        while let Ok(event) = out_rx.try_recv() {
            produced.push(event);
        }
        produced
    }

    fn calendar_rule(
        repo: Arc<TraceRepo>,
        gateway: Arc<CalendarGateway>,
        mode: PersistMode,
        ids: Vec<TableId>,
    ) -> Box<dyn EventRule> {
        Box::new(UpdateRule::new(
            "calendar",
            Box::new(FixedSelector(ids)),
            gateway,
            ok_validator,
            repo,
            mode,
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn empty_table_is_filled_and_completion_emitted() {
        let id = TableId::single("trading_dates");
        let repo = TraceRepo::new();
        let row = range((1997, 3, 24), (2024, 5, 17));
        let gateway = CalendarGateway::new(vec![row]);

        let produced = drive(
            calendar_rule(repo.clone(), gateway, PersistMode::Replace, vec![id.clone()]),
            vec![trigger((2024, 5, 17))],
        )
        .await;

        assert_eq!(
            produced,
            vec![Event::UpdateCompleted(Version::new(id.clone(), date(2024, 5, 17)))]
        );
        assert_eq!(repo.rows(&id), vec![row]);
    }

    #[tokio::test]
    async fn unchanged_upstream_emits_nothing_twice() {
        let id = TableId::single("trading_dates");
        let repo = TraceRepo::new();
        let row = range((1997, 3, 24), (2024, 5, 17));
        let gateway = CalendarGateway::new(vec![row]);

        let first = drive(
            calendar_rule(
                repo.clone(),
                gateway.clone(),
                PersistMode::Replace,
                vec![id.clone()],
            ),
            vec![trigger((2024, 5, 17))],
        )
        .await;
        assert_eq!(first.len(), 1);

        // Same trigger, upstream unchanged: silence, no second write.
        let second = drive(
            calendar_rule(
                repo.clone(),
                gateway.clone(),
                PersistMode::Replace,
                vec![id.clone()],
            ),
            vec![trigger((2024, 5, 17))],
        )
        .await;
        assert!(second.is_empty());
        assert_eq!(
            repo.trace().iter().filter(|t| t.starts_with("replace")).count(),
            1
        );

        // Upstream moved forward: one more replace.
        let newer = range((1997, 3, 24), (2024, 5, 20));
        gateway.set_provider(vec![newer]);
        let third = drive(
            calendar_rule(repo.clone(), gateway, PersistMode::Replace, vec![id.clone()]),
            vec![trigger((2024, 5, 20))],
        )
        .await;
        assert_eq!(third.len(), 1);
        assert_eq!(repo.rows(&id), vec![newer]);
    }

    #[tokio::test]
    async fn persist_strictly_precedes_emit() {
        let id = TableId::single("trading_dates");
        let repo = TraceRepo::with_slow_writes();
        let gateway = CalendarGateway::new(vec![range((1997, 3, 24), (2024, 5, 17))]);

        let rule = calendar_rule(repo.clone(), gateway, PersistMode::Replace, vec![id]);
        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let handle = tokio::spawn(rule.activate(in_rx, out_tx));

        in_tx.send(trigger((2024, 5, 17))).await.unwrap();

        // The moment the completion event becomes observable, the slow
        // write must already have committed.
        let event = out_rx.recv().await.unwrap();
        assert!(matches!(event, Event::UpdateCompleted(_)));
        let trace = repo.trace();
        assert!(
            trace.iter().any(|t| t.starts_with("replace")),
            "completion observed before persistence: {trace:?}",
        );

        drop(in_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn append_skips_the_overlap_sentinel() {
        let id = TableId::single("usd");
        let repo = TraceRepo::new();
        let stored = range((2024, 5, 15), (2024, 5, 15));
        repo.preload(&id, vec![stored]);

        let fresh = vec![
            stored,
            range((2024, 5, 16), (2024, 5, 16)),
            range((2024, 5, 17), (2024, 5, 17)),
        ];
        let gateway = CalendarGateway::new(fresh.clone());

        let produced = drive(
            calendar_rule(repo.clone(), gateway, PersistMode::Append, vec![id.clone()]),
            vec![trigger((2024, 5, 17))],
        )
        .await;

        assert_eq!(produced.len(), 1);
        // Three fetched, two appended: the sentinel stays where it was.
        assert_eq!(repo.rows(&id), fresh);
        assert!(repo.trace().contains(&format!("append {id} rows 2")));
    }

    #[tokio::test]
    async fn append_into_empty_table_keeps_every_row() {
        let id = TableId::single("usd");
        let repo = TraceRepo::new();
        let fresh = vec![
            range((2024, 5, 16), (2024, 5, 16)),
            range((2024, 5, 17), (2024, 5, 17)),
        ];
        let gateway = CalendarGateway::new(fresh.clone());

        let produced = drive(
            calendar_rule(repo.clone(), gateway, PersistMode::Append, vec![id.clone()]),
            vec![trigger((2024, 5, 17))],
        )
        .await;

        assert_eq!(produced.len(), 1);
        assert_eq!(repo.rows(&id), fresh);
    }

    #[tokio::test]
    async fn lone_sentinel_means_no_change_in_append_mode() {
        let id = TableId::single("usd");
        let repo = TraceRepo::new();
        let stored = range((2024, 5, 15), (2024, 5, 15));
        repo.preload(&id, vec![stored]);

        // Provider has nothing past what is stored, so the fake returns
        // nothing; a real candle gateway would return just the sentinel.
        // Exercise that case directly too.
        struct SentinelGateway(DateRange);

        #[async_trait]
        impl TableGateway<DateRange> for SentinelGateway {
            async fn fetch(
                &self,
                _table: &Table<DateRange>,
                _as_of: NaiveDate,
            ) -> Result<Vec<DateRange>, GatewayError> {
                Ok(vec![self.0])
            }
        }

        let produced = drive(
            Box::new(UpdateRule::new(
                "usd",
                Box::new(FixedSelector(vec![id.clone()])),
                Arc::new(SentinelGateway(stored)),
                ok_validator,
                repo.clone(),
                PersistMode::Append,
                Duration::from_secs(5),
            )),
            vec![trigger((2024, 5, 17))],
        )
        .await;

        assert!(produced.is_empty());
        assert_eq!(repo.rows(&id), vec![stored]);
    }

    #[tokio::test]
    async fn selected_ids_inherit_the_event_date() {
        let ids = vec![
            TableId::new("indexes", "MCFTRR"),
            TableId::new("indexes", "MEOGTRR"),
        ];
        let repo = TraceRepo::new();
        let gateway = CalendarGateway::new(vec![range((2024, 5, 17), (2024, 5, 17))]);

        let produced = drive(
            calendar_rule(repo, gateway.clone(), PersistMode::Replace, ids.clone()),
            vec![trigger((2024, 5, 17))],
        )
        .await;

        assert_eq!(produced.len(), 2);
        let fetched = gateway.fetched_dates.lock().unwrap().clone();
        assert_eq!(fetched.len(), 2);
        for (id, as_of) in &fetched {
            assert!(ids.contains(id));
            // Always the event's logical date, never emission time.
            assert_eq!(*as_of, date(2024, 5, 17));
        }
    }

    #[tokio::test]
    async fn validation_failure_emits_error_and_persists_nothing() {
        fn reject(_: &Table<DateRange>, _: &[DateRange]) -> Result<(), ValidationError> {
            Err(ValidationError("row count mismatch".into()))
        }

        let id = TableId::single("trading_dates");
        let repo = TraceRepo::new();
        let gateway = CalendarGateway::new(vec![range((1997, 3, 24), (2024, 5, 17))]);

        let produced = drive(
            Box::new(UpdateRule::new(
                "calendar",
                Box::new(FixedSelector(vec![id.clone()])),
                gateway,
                reject,
                repo.clone(),
                PersistMode::Replace,
                Duration::from_secs(5),
            )),
            vec![trigger((2024, 5, 17))],
        )
        .await;

        assert_eq!(produced.len(), 1);
        match &produced[0] {
            Event::ErrorOccurred { version, error } => {
                assert_eq!(version.id(), &id);
                assert!(matches!(error, UpdateError::Validation(_)));
            }
            other => panic!("expected ErrorOccurred, got {other:?}"),
        }
        assert!(repo.rows(&id).is_empty());
    }

    #[tokio::test]
    async fn selector_failure_reports_the_trigger_version() {
        let repo = TraceRepo::new();
        let gateway = CalendarGateway::new(Vec::new());

        let produced = drive(
            Box::new(UpdateRule::new(
                "calendar",
                Box::new(FailingSelector),
                gateway,
                ok_validator,
                repo,
                PersistMode::Replace,
                Duration::from_secs(5),
            )),
            vec![trigger((2024, 5, 17))],
        )
        .await;

        assert_eq!(
            produced,
            vec![Event::ErrorOccurred {
                version: Version::new(TableId::single("day_ended"), date(2024, 5, 17)),
                error: UpdateError::Selection("unrecognized event".into()),
            }]
        );
    }

    #[tokio::test]
    async fn slow_fetch_exceeds_the_event_deadline() {
        let id = TableId::single("trading_dates");
        let repo = TraceRepo::new();
        let gateway = CalendarGateway::slow(
            vec![range((1997, 3, 24), (2024, 5, 17))],
            Duration::from_millis(200),
        );

        let produced = drive(
            Box::new(UpdateRule::new(
                "calendar",
                Box::new(FixedSelector(vec![id.clone()])),
                gateway,
                ok_validator,
                repo.clone(),
                PersistMode::Replace,
                Duration::from_millis(20),
            )),
            vec![trigger((2024, 5, 17))],
        )
        .await;

        assert_eq!(produced.len(), 1);
        match &produced[0] {
            Event::ErrorOccurred { error, .. } => {
                assert!(matches!(error, UpdateError::DeadlineExceeded { .. }));
            }
            other => panic!("expected ErrorOccurred, got {other:?}"),
        }
        assert!(repo.rows(&id).is_empty());
    }
}
