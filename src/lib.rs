//! market-sync
//!
//! Keeps a set of versioned market data tables (trading calendar, USD
//! rate candles, stock index candles, consumer price index) synchronized
//! with external providers through an event-driven pipeline.
//!
//! # Architecture
//!
//! ```text
//!  timer ──UpdateRequired──┐
//!                          │
//!                     ┌────▼────┐
//!     ┌──────────────►│EventBus │◄──────────────┐
//!     │               └────┬────┘               │
//!     │      fan-out to every rule's input      │
//!     │    ┌────────┬──────┴───┬─────────┐      │
//!  ┌──┴──┐ │ ┌──────▼──────┐ ┌─▼───┐ ┌───▼───┐  │
//!  │ usd │◄┘ │trading_dates│ │ cpi │ │indexes│  │
//!  └──┬──┘   └──────┬──────┘ └──┬──┘ └───┬───┘  │
//!     │             │           │        │      │
//!     └──────►──────┴─────►─────┴────────┴──────┘
//!           UpdateCompleted / ErrorOccurred
//! ```
//!
//! Each rule is an instance of the generic update template: a selector
//! picks the table versions that must react to an event, a gateway
//! fetches candidate rows from the provider, a validator checks them, and
//! the repository persists them strictly before the completion event is
//! emitted. The bus delivers every event to every rule over rendezvous
//! queues, so backpressure propagates end to end and nothing is dropped.
//! Stored tables are served as JSON at `GET /{group}/{name}`.

pub mod app;
pub mod bus;
pub mod config;
pub mod domain;
pub mod events;
pub mod iss;
pub mod ports;
pub mod rule;
pub mod rules;
pub mod server;
pub mod stats;
pub mod store;
pub mod telemetry;
