//! USD exchange-rate rule.
//!
//! Appends daily tom-settled USD candles whenever the trading calendar
//! confirms a new day. Fetches restart at the last stored candle so the
//! first fetched row doubles as the overlap sentinel.

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

pub const GROUP: &str = "usd";

const ENGINE: &str = "currency";
const MARKET: &str = "selt";
const SECURITY: &str = "USD000UTSTOM";

pub fn id() -> TableId {
    TableId::single(GROUP)
}

pub struct UsdSelector;

impl Selector for UsdSelector {
    fn select(&self, event: &Event) -> Result<Vec<TableId>, UpdateError> {
        match event {
            Event::UpdateCompleted(version) if version.id() == &trading_dates::id() => {
                Ok(vec![id()])
            }
            _ => Ok(Vec::new()),
        }
    }
}

pub struct UsdGateway {
    iss: Arc<IssClient>,
}

#[async_trait]
impl TableGateway<Candle> for UsdGateway {
    async fn fetch(&self, table: &Table<Candle>, as_of: NaiveDate) -> Result<Vec<Candle>, GatewayError> {
        let from = table.last_row().map(|candle| candle.begin.date());

        self.iss.candles(ENGINE, MARKET, SECURITY, from, as_of).await
    }
}

/// Append batches must continue the stored series: their first row is the
/// last stored candle, guarding against provider gaps.
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
        "usd",
        Box::new(UsdSelector),
        Arc::new(UsdGateway { iss }),
        validate,
        repo,
        PersistMode::Append,
        deadline,
    ))
}
