//! Trading calendar rule.
//!
//! Reacts to the timer's day-ended trigger and refreshes the single-row
//! table holding the date range the shares market has data for. Every
//! other market table keys off this rule's completions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::bus::EventRule;
use crate::domain::{DateRange, Table, TableId};
use crate::events::{Event, UpdateError};
use crate::iss::IssClient;
use crate::ports::{GatewayError, Repository, Selector, TableGateway, ValidationError};
use crate::rule::{PersistMode, UpdateRule};
use crate::rules::timer;

pub const GROUP: &str = "trading_dates";

const ENGINE: &str = "stock";
const MARKET: &str = "shares";

pub fn id() -> TableId {
    TableId::single(GROUP)
}

pub struct DatesSelector;

impl Selector for DatesSelector {
    fn select(&self, event: &Event) -> Result<Vec<TableId>, UpdateError> {
        match event {
            Event::UpdateRequired(version) if version.id() == &timer::id() => Ok(vec![id()]),
            _ => Ok(Vec::new()),
        }
    }
}

pub struct DatesGateway {
    iss: Arc<IssClient>,
}

#[async_trait]
impl TableGateway<DateRange> for DatesGateway {
    async fn fetch(
        &self,
        table: &Table<DateRange>,
        _as_of: NaiveDate,
    ) -> Result<Vec<DateRange>, GatewayError> {
        let rows = self.iss.market_dates(ENGINE, MARKET).await?;

        match (table.last_row(), rows.first()) {
            (_, None) => Ok(Vec::new()),
            (None, Some(_)) => Ok(rows),
            (Some(stored), Some(fresh)) if stored.till < fresh.till => Ok(rows),
            _ => Ok(Vec::new()),
        }
    }
}

pub fn validate(_table: &Table<DateRange>, rows: &[DateRange]) -> Result<(), ValidationError> {
    if rows.len() != 1 {
        return Err(ValidationError(format!(
            "trading calendar must be a single row, got {}",
            rows.len(),
        )));
    }

    Ok(())
}

pub fn rule(
    repo: Arc<dyn Repository<DateRange>>,
    iss: Arc<IssClient>,
    deadline: Duration,
) -> Box<dyn EventRule> {
    Box::new(UpdateRule::new(
        "trading_dates",
        Box::new(DatesSelector),
        Arc::new(DatesGateway { iss }),
        validate,
        repo,
        PersistMode::Replace,
        deadline,
    ))
}
