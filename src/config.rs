//! Environment configuration.

use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(from = "SERVER_ADDR", default = "0.0.0.0:3000")]
    pub server_addr: String,

    #[envconfig(from = "ISS_URL", default = "https://iss.moex.com")]
    pub iss_url: String,

    #[envconfig(from = "CPI_URL", default = "https://rosstat.gov.ru/storage/mediabank/ipc_monthly.csv")]
    pub cpi_url: String,

    /// Budget for starting all modules.
    #[envconfig(from = "START_TIMEOUT_SEC", default = "30")]
    pub start_timeout_sec: u64,

    /// Budget for stopping each module after a termination signal.
    #[envconfig(from = "SHUTDOWN_TIMEOUT_SEC", default = "30")]
    pub shutdown_timeout_sec: u64,

    /// Budget for one HTTP view request.
    #[envconfig(from = "REQUEST_TIMEOUT_SEC", default = "5")]
    pub request_timeout_sec: u64,

    /// Budget for the fetch/validate stage of one update.
    #[envconfig(from = "EVENT_DEADLINE_SEC", default = "45")]
    pub event_deadline_sec: u64,

    #[envconfig(from = "LOG_FILTER", default = "info")]
    pub log_filter: String,
}

impl Config {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_sec)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_sec)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    pub fn event_deadline(&self) -> Duration {
        Duration::from_secs(self.event_deadline_sec)
    }
}
