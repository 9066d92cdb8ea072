//! Retrieval of Eurostat statistics over the SDMX 2.1 dissemination API.

#[macro_use]
extern crate lazy_static;

pub mod common;
pub mod config;
pub mod error;
pub mod eurostat;
pub mod series;

pub use common::{DataTable, ObsValue, Observation};
pub use config::{ProxySettings, RequestConfig};
pub use error::{ConfigError, EurostatError, Result, SeriesError};
pub use series::{SeriesSpec, WideSeries};
