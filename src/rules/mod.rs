//! The business rules routed by the event bus.
//!
//! `timer` produces the daily trigger, `trading_dates` refreshes the
//! calendar from it, and the market tables (`usd`, `indexes`, `cpi`) key
//! off calendar completions. `errors` consumes every failure event
//! centrally.

pub mod cpi;
pub mod errors;
pub mod indexes;
pub mod timer;
pub mod trading_dates;
pub mod usd;
