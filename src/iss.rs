//! HTTP client for the MOEX ISS API.
//!
//! ISS serves every table in the same envelope: a JSON object per block
//! with parallel `columns` and `data` arrays. The client flattens that
//! shape into typed rows and hides the `start` offset pagination the
//! candles endpoint requires.

use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::{Candle, DateRange};
use crate::ports::GatewayError;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_IDLE_CONNS_PER_HOST: usize = 20;

/// Daily interval code of the candles endpoint.
const INTERVAL_DAY: &str = "24";

pub struct IssClient {
    http: reqwest::Client,
    base: String,
}

impl IssClient {
    pub fn new(base: impl Into<String>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_CONNS_PER_HOST)
            .build()?;

        let base = base.into().trim_end_matches('/').to_string();

        Ok(Self { http, base })
    }

    /// Date ranges the market has data for. The shares market returns a
    /// single row whose `till` is the last completed trading day.
    pub async fn market_dates(
        &self,
        engine: &str,
        market: &str,
    ) -> Result<Vec<DateRange>, GatewayError> {
        let url = format!(
            "{}/iss/engines/{engine}/markets/{market}/securities/dates.json",
            self.base,
        );
        let payload: Value = self
            .http
            .get(&url)
            .query(&[("iss.meta", "off"), ("iss.only", "dates")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_dates(&payload)
    }

    /// Daily candles for one security, oldest first. Pages through the
    /// `start` offset cursor until the server returns an empty batch.
    pub async fn candles(
        &self,
        engine: &str,
        market: &str,
        security: &str,
        from: Option<NaiveDate>,
        till: NaiveDate,
    ) -> Result<Vec<Candle>, GatewayError> {
        let url = format!(
            "{}/iss/engines/{engine}/markets/{market}/securities/{security}/candles.json",
            self.base,
        );

        let mut all: Vec<Candle> = Vec::new();
        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("iss.meta", "off".to_string()),
                ("interval", INTERVAL_DAY.to_string()),
                ("till", till.to_string()),
                ("start", all.len().to_string()),
            ];
            if let Some(from) = from {
                query.push(("from", from.to_string()));
            }

            let payload: Value = self
                .http
                .get(&url)
                .query(&query)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let batch = parse_candles(&payload)?;
            if batch.is_empty() {
                return Ok(all);
            }
            all.extend(batch);
        }
    }
}

pub(crate) fn parse_dates(payload: &Value) -> Result<Vec<DateRange>, GatewayError> {
    let (columns, rows) = block(payload, "dates")?;
    let from = column(&columns, "from")?;
    let till = column(&columns, "till")?;

    rows.iter()
        .map(|row| {
            Ok(DateRange {
                from: date_cell(row, from)?,
                till: date_cell(row, till)?,
            })
        })
        .collect()
}

pub(crate) fn parse_candles(payload: &Value) -> Result<Vec<Candle>, GatewayError> {
    let (columns, rows) = block(payload, "candles")?;
    let begin = column(&columns, "begin")?;
    let end = column(&columns, "end")?;
    let open = column(&columns, "open")?;
    let close = column(&columns, "close")?;
    let high = column(&columns, "high")?;
    let low = column(&columns, "low")?;
    let value = column(&columns, "value")?;
    let volume = column(&columns, "volume")?;

    rows.iter()
        .map(|row| {
            Ok(Candle {
                begin: datetime_cell(row, begin)?,
                end: datetime_cell(row, end)?,
                open: decimal_cell(row, open)?,
                close: decimal_cell(row, close)?,
                high: decimal_cell(row, high)?,
                low: decimal_cell(row, low)?,
                // Indices can trade without turnover; ISS sends null.
                value: decimal_cell_or_zero(row, value)?,
                volume: volume_cell(row, volume)?,
            })
        })
        .collect()
}

fn block<'a>(payload: &'a Value, name: &str) -> Result<(Vec<String>, &'a [Value]), GatewayError> {
    let table = payload
        .get(name)
        .ok_or_else(|| GatewayError::Decode(format!("missing block {name}")))?;

    let columns = table
        .get("columns")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Decode(format!("block {name} has no columns")))?
        .iter()
        .map(|c| {
            c.as_str()
                .map(str::to_string)
                .ok_or_else(|| GatewayError::Decode(format!("block {name} has a non-string column")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let rows = table
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Decode(format!("block {name} has no data")))?;

    Ok((columns, rows))
}

fn column(columns: &[String], name: &str) -> Result<usize, GatewayError> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| GatewayError::Decode(format!("missing column {name}")))
}

fn cell<'a>(row: &'a Value, index: usize) -> Result<&'a Value, GatewayError> {
    row.get(index)
        .ok_or_else(|| GatewayError::Decode(format!("row too short for column {index}")))
}

fn date_cell(row: &Value, index: usize) -> Result<NaiveDate, GatewayError> {
    let raw = cell(row, index)?
        .as_str()
        .ok_or_else(|| GatewayError::Decode("date cell is not a string".into()))?;

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|err| GatewayError::Decode(format!("bad date {raw}: {err}")))
}

fn datetime_cell(row: &Value, index: usize) -> Result<NaiveDateTime, GatewayError> {
    let raw = cell(row, index)?
        .as_str()
        .ok_or_else(|| GatewayError::Decode("datetime cell is not a string".into()))?;

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map_err(|err| GatewayError::Decode(format!("bad datetime {raw}: {err}")))
}

fn decimal_cell(row: &Value, index: usize) -> Result<Decimal, GatewayError> {
    match cell(row, index)? {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .map_err(|err| GatewayError::Decode(format!("bad decimal {n}: {err}"))),
        other => Err(GatewayError::Decode(format!("decimal cell is {other}"))),
    }
}

fn decimal_cell_or_zero(row: &Value, index: usize) -> Result<Decimal, GatewayError> {
    match cell(row, index)? {
        Value::Null => Ok(Decimal::ZERO),
        _ => decimal_cell(row, index),
    }
}

fn volume_cell(row: &Value, index: usize) -> Result<u64, GatewayError> {
    match cell(row, index)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| GatewayError::Decode(format!("bad volume {n}"))),
        other => Err(GatewayError::Decode(format!("volume cell is {other}"))),
    }
}
