//! Stock index rule.
//!
//! One rule maintains every tracked index table; the selector fans a
//! single calendar completion out to one version per index, and those
//! versions update concurrently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::bus::EventRule;
use crate::domain::{Candle, Table, TableId};
use crate::events::{Event, UpdateError};
use crate::iss::IssClient;
use crate::ports::{GatewayError, Repository, Selector, TableGateway, ValidationError};
use crate::rule::{PersistMode, UpdateRule};
use crate::rules::trading_dates;

pub const GROUP: &str = "indexes";

/// Total-return and volatility indexes the portfolio logic consumes.
pub const SECURITIES: [&str; 3] = ["MCFTRR", "MEOGTRR", "RVI"];

const ENGINE: &str = "stock";
const MARKET: &str = "index";

pub fn ids() -> Vec<TableId> {
    SECURITIES
        .iter()
        .map(|security| TableId::new(GROUP, *security))
        .collect()
}

pub struct IndexesSelector;

impl Selector for IndexesSelector {
    fn select(&self, event: &Event) -> Result<Vec<TableId>, UpdateError> {
        match event {
            Event::UpdateCompleted(version) if version.id() == &trading_dates::id() => Ok(ids()),
            _ => Ok(Vec::new()),
        }
    }
}

pub struct IndexesGateway {
    iss: Arc<IssClient>,
}

#[async_trait]
impl TableGateway<Candle> for IndexesGateway {
    async fn fetch(&self, table: &Table<Candle>, as_of: NaiveDate) -> Result<Vec<Candle>, GatewayError> {
        let from = table.last_row().map(|candle| candle.begin.date());

        self.iss
            .candles(ENGINE, MARKET, table.id().name(), from, as_of)
            .await
    }
}

pub fn validate(table: &Table<Candle>, rows: &[Candle]) -> Result<(), ValidationError> {
    if !table.overlaps(rows) {
        return Err(ValidationError(
            "candle batch does not start at the stored tail".into(),
        ));
    }

    Ok(())
}

pub fn rule(
    repo: Arc<dyn Repository<Candle>>,
    iss: Arc<IssClient>,
    deadline: Duration,
) -> Box<dyn EventRule> {
    Box::new(UpdateRule::new(
        "indexes",
        Box::new(IndexesSelector),
        Arc::new(IndexesGateway { iss }),
        validate,
        repo,
        PersistMode::Append,
        deadline,
    ))
}
