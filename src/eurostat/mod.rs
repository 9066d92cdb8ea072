//! Client for the Eurostat SDMX 2.1 dissemination API and its sibling providers.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use flate2::read::GzDecoder;

use crate::error::{EurostatError, Result};

pub mod catalog;
pub mod codelist;
pub mod data;
pub mod fetch;
pub mod poll;
pub mod structure;
pub mod transport;
pub mod xml;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{get_toc, subset_toc, CatalogEntry};
pub use codelist::{get_dic, get_par_values, get_pars, Dictionary, DictionaryForm};
pub use data::{get_data, DataRequest, Filters};
pub use fetch::Client;
pub use structure::{resolve, Detail, Dimension, Resolution};
pub use transport::{RawResponse, Transport, UreqTransport};

pub const USER_AGENT: &str = "eurostat-acquisition/0.1";

/// Final URL of the redirect served while the API is down for maintenance.
pub const SORRY_URL: &str = "https://sorry.ec.europa.eu/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Eurostat,
    Comext,
    Comp,
    Empl,
    Grow,
}

impl Provider {
    /// Declared order; also the order in which dataset codes are resolved.
    pub const ALL: [Provider; 5] = [
        Provider::Eurostat,
        Provider::Comext,
        Provider::Comp,
        Provider::Empl,
        Provider::Grow,
    ];

    pub fn base_url(self) -> &'static str {
        match self {
            Provider::Eurostat => "https://ec.europa.eu/eurostat/api/dissemination/sdmx/2.1/",
            Provider::Comext => "https://ec.europa.eu/eurostat/api/comext/dissemination/sdmx/2.1/",
            Provider::Comp => "https://webgate.ec.europa.eu/comp/redisstat/api/dissemination/sdmx/2.1/",
            Provider::Empl => "https://webgate.ec.europa.eu/empl/redisstat/api/dissemination/sdmx/2.1/",
            Provider::Grow => "https://webgate.ec.europa.eu/grow/redisstat/api/dissemination/sdmx/2.1/",
        }
    }

    pub fn async_url(self) -> &'static str {
        match self {
            Provider::Eurostat => "https://ec.europa.eu/eurostat/api/dissemination/1.0/async/",
            Provider::Comext => "https://ec.europa.eu/eurostat/api/comext/dissemination/1.0/async/",
            Provider::Comp => "https://ec.europa.eu/eurostat/api/compl/dissemination/1.0/async/",
            Provider::Empl => "https://ec.europa.eu/eurostat/api/empl/dissemination/1.0/async/",
            Provider::Grow => "https://ec.europa.eu/eurostat/api/grow/dissemination/1.0/async/",
        }
    }

    /// Agency that owns this provider's structural metadata.
    pub fn agency(self) -> &'static str {
        match self {
            Provider::Eurostat | Provider::Comext => "ESTAT",
            Provider::Comp => "COMP",
            Provider::Empl => "EMPL",
            Provider::Grow => "GROW",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Provider::Eurostat => "EUROSTAT",
            Provider::Comext => "COMEXT",
            Provider::Comp => "COMP",
            Provider::Empl => "EMPL",
            Provider::Grow => "GROW",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown provider: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    En,
    Fr,
    De,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
            Language::De => "de",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::En
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "en" => Ok(Language::En),
            "fr" => Ok(Language::Fr),
            "de" => Ok(Language::De),
            q => Err(format!("Unsupported language: {} (expected en, fr or de)", q)),
        }
    }
}

/// Inflates a `compressed=true` payload into text.
pub(crate) fn gunzip(url: &str, body: &[u8]) -> Result<String> {
    let mut decoder = GzDecoder::new(body);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|source| EurostatError::Decompress { url: url.to_owned(), source })?;
    Ok(text)
}
