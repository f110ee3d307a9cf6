//! HTTP client for the consumer price index series.
//!
//! The statistics service publishes monthly inflation as a two-column CSV
//! (`date,value`): the month-end date and the price change factor for that
//! month. The series starts at January 1991 and is republished in full,
//! so callers always receive the complete history.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::CpiRow;
use crate::ports::GatewayError;

pub struct StatsClient {
    http: reqwest::Client,
    url: String,
}

impl StatsClient {
    pub fn new(url: impl Into<String>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub async fn monthly_cpi(&self) -> Result<Vec<CpiRow>, GatewayError> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_cpi_csv(&body)
    }
}

pub(crate) fn parse_cpi_csv(body: &str) -> Result<Vec<CpiRow>, GatewayError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| GatewayError::Decode(err.to_string()))?;

        let raw_date = record
            .get(0)
            .ok_or_else(|| GatewayError::Decode("cpi row has no date column".into()))?;
        let raw_value = record
            .get(1)
            .ok_or_else(|| GatewayError::Decode("cpi row has no value column".into()))?;

        rows.push(CpiRow {
            date: NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
                .map_err(|err| GatewayError::Decode(format!("bad cpi date {raw_date}: {err}")))?,
            value: Decimal::from_str(raw_value)
                .map_err(|err| GatewayError::Decode(format!("bad cpi value {raw_value}: {err}")))?,
        });
    }

    Ok(rows)
}
