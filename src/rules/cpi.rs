//! Consumer price index rule.
//!
//! The statistics service republishes the whole monthly series, so this
//! rule runs in replace mode: when the series has grown past what is
//! stored, the full history is validated and written anew.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate};

use crate::bus::EventRule;
use crate::domain::{CpiRow, Table, TableId};
use crate::events::{Event, UpdateError};
use crate::ports::{GatewayError, Repository, Selector, TableGateway, ValidationError};
use crate::rule::{PersistMode, UpdateRule};
use crate::rules::trading_dates;
use crate::stats::StatsClient;

pub const GROUP: &str = "cpi";

pub fn id() -> TableId {
    TableId::single(GROUP)
}

pub struct CpiSelector;

impl Selector for CpiSelector {
    fn select(&self, event: &Event) -> Result<Vec<TableId>, UpdateError> {
        match event {
            Event::UpdateCompleted(version) if version.id() == &trading_dates::id() => {
                Ok(vec![id()])
            }
            _ => Ok(Vec::new()),
        }
    }
}

pub struct CpiGateway {
    stats: Arc<StatsClient>,
}

#[async_trait]
impl TableGateway<CpiRow> for CpiGateway {
    async fn fetch(&self, table: &Table<CpiRow>, _as_of: NaiveDate) -> Result<Vec<CpiRow>, GatewayError> {
        let rows = self.stats.monthly_cpi().await?;

        match (table.last_row(), rows.last()) {
            (_, None) => Ok(Vec::new()),
            (None, Some(_)) => Ok(rows),
            (Some(stored), Some(fresh)) if stored.date < fresh.date => Ok(rows),
            _ => Ok(Vec::new()),
        }
    }
}

/// The series must be the uninterrupted monthly history: month-end dates
/// from January 1991 onward, each exactly one month after the previous.
pub fn validate(_table: &Table<CpiRow>, rows: &[CpiRow]) -> Result<(), ValidationError> {
    let Some(first) = rows.first() else {
        return Err(ValidationError("cpi series is empty".into()));
    };

    if Some(first.date) != NaiveDate::from_ymd_opt(1991, 1, 31) {
        return Err(ValidationError(format!(
            "cpi series must start at 1991-01-31, got {}",
            first.date,
        )));
    }

    for pair in rows.windows(2) {
        let expected = next_month_end(pair[0].date);
        if expected != Some(pair[1].date) {
            return Err(ValidationError(format!(
                "cpi series breaks after {}: got {}",
                pair[0].date, pair[1].date,
            )));
        }
    }

    Ok(())
}

/// The month-end following `date`; `None` when `date` is itself not a
/// month end.
fn next_month_end(date: NaiveDate) -> Option<NaiveDate> {
    let next_first = date.succ_opt()?;
    if next_first.day0() != 0 {
        return None;
    }

    next_first.checked_add_months(Months::new(1))?.pred_opt()
}

pub fn rule(
    repo: Arc<dyn Repository<CpiRow>>,
    stats: Arc<StatsClient>,
    deadline: Duration,
) -> Box<dyn EventRule> {
    Box::new(UpdateRule::new(
        "cpi",
        Box::new(CpiSelector),
        Arc::new(CpiGateway { stats }),
        validate,
        repo,
        PersistMode::Replace,
        deadline,
    ))
}
