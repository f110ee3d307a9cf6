//! Identity and table model for versioned market data.
//!
//! Every stored table is addressed by a two-level `TableId` (group, name).
//! Groups holding a single table use the group string as the name. A
//! `Version` pairs an id with the logical as-of date an event concerns,
//! which is the correlation key across the whole pipeline: a rule reacting
//! to an event processes every selected id at the event's date, never at
//! wall-clock time.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Category of table, e.g. `trading_dates` or `usd`.
pub type Group = String;

/// Name of a specific table within its group.
pub type Name = String;

/// Immutable identifier of one stored table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    group: Group,
    name: Name,
}

impl TableId {
    pub fn new(group: impl Into<Group>, name: impl Into<Name>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Id for a single-table group: the name repeats the group.
    pub fn single(group: impl Into<Group>) -> Self {
        let group = group.into();
        Self {
            name: group.clone(),
            group,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// A table id pinned to the logical date an event or command concerns.
///
/// Two versions are equal iff both the id and the date match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    id: TableId,
    date: NaiveDate,
}

impl Version {
    pub fn new(id: TableId, date: NaiveDate) -> Self {
        Self { id, date }
    }

    pub fn id(&self) -> &TableId {
        &self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.date)
    }
}

/// A versioned collection of homogeneous rows in provider order.
///
/// The table is either empty or its last row establishes the last known
/// date used to decide whether the provider has new data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table<R> {
    id: TableId,
    rows: Vec<R>,
}

impl<R> Table<R> {
    pub fn new(id: TableId, rows: Vec<R>) -> Self {
        Self { id, rows }
    }

    pub fn empty(id: TableId) -> Self {
        Self { id, rows: Vec::new() }
    }

    pub fn id(&self) -> &TableId {
        &self.id
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_row(&self) -> Option<&R> {
        self.rows.last()
    }
}

impl<R: PartialEq> Table<R> {
    /// Whether a fetched batch starts with the overlap sentinel: its first
    /// row repeats the last stored row. An empty table overlaps with any
    /// batch (there is nothing to contradict yet).
    pub fn overlaps(&self, rows: &[R]) -> bool {
        match self.last_row() {
            None => true,
            Some(last) => rows.first() == Some(last),
        }
    }
}

/// One row of the trading calendar: the date range the market has data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub till: NaiveDate,
}

/// A daily candle as served by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    /// Turnover in roubles.
    pub value: Decimal,
    pub volume: u64,
}

/// One month of consumer price inflation: month-end date and the price
/// change factor for that month (1.0083 means +0.83%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpiRow {
    pub date: NaiveDate,
    pub value: Decimal,
}
