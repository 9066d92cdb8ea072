//! Table of contents: the dataflows each provider publishes.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fetch::Client;
use super::transport::RawResponse;
use super::{gunzip, Language, Provider};
use crate::error::{EurostatError, Result};

#[derive(Deserialize, Debug)]
struct DataflowListing {
    link: Link,
}

#[derive(Deserialize, Debug)]
struct Link {
    #[serde(default)]
    item: Vec<DataflowItem>,
}

#[derive(Deserialize, Debug)]
struct DataflowItem {
    label: String,
    #[serde(default)]
    class: String,
    extension: Extension,
}

#[derive(Deserialize, Debug)]
struct Extension {
    id: String,
    #[serde(default)]
    annotation: Vec<Annotation>,
}

#[derive(Deserialize, Debug)]
struct Annotation {
    #[serde(rename = "type")]
    kind: String,
    date: Option<String>,
    title: Option<String>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct CatalogEntry {
    pub title: String,
    pub code: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub last_update: Option<String>,
    pub last_structure_change: Option<String>,
    pub data_start: Option<String>,
    pub data_end: Option<String>,
}

impl CatalogEntry {
    pub const HEADER: [&'static str; 7] = [
        "title",
        "code",
        "type",
        "last update of data",
        "last table structure change",
        "data start",
        "data end",
    ];

    pub fn to_record(&self) -> Vec<String> {
        vec![
            self.title.clone(),
            self.code.clone(),
            self.kind.clone(),
            self.last_update.clone().unwrap_or_default(),
            self.last_structure_change.clone().unwrap_or_default(),
            self.data_start.clone().unwrap_or_default(),
            self.data_end.clone().unwrap_or_default(),
        ]
    }
}

impl From<DataflowItem> for CatalogEntry {
    fn from(item: DataflowItem) -> Self {
        let mut entry = CatalogEntry {
            title: item.label,
            code: item.extension.id,
            kind: item.class,
            ..CatalogEntry::default()
        };
        for annotation in item.extension.annotation {
            match annotation.kind.as_ref() {
                "UPDATE_DATA" => entry.last_update = annotation.date,
                "UPDATE_STRUCTURE" => entry.last_structure_change = annotation.date,
                "OBS_PERIOD_OVERALL_OLDEST" => entry.data_start = annotation.title,
                "OBS_PERIOD_OVERALL_LATEST" => entry.data_end = annotation.title,
                _ => {}
            }
        }
        entry
    }
}

fn decode<T: for<'de> Deserialize<'de>>(url: &str, response: &RawResponse) -> Result<T> {
    let text = gunzip(url, &response.body)?;
    serde_json::from_str(&text).map_err(|source| EurostatError::Json { url: url.to_owned(), source })
}

/// Lists the datasets of `providers` (all of them when empty), or only `dataset`,
/// taken from the first provider that knows it.
pub fn get_toc(
    client: &Client,
    providers: &[Provider],
    dataset: Option<&str>,
    language: Language,
) -> Result<Vec<CatalogEntry>> {
    let all: &[Provider] = &Provider::ALL;
    let providers = if providers.is_empty() { all } else { providers };
    let mut entries = Vec::new();

    for &provider in providers {
        match dataset {
            None => {
                let url = format!(
                    "{}dataflow/all?format=JSON&compressed=true&lang={}",
                    provider.base_url(),
                    language.code()
                );
                let response = match client.fetch(&url, provider, true)? {
                    Some(r) if r.is_success() => r,
                    Some(r) => {
                        warn!(%provider, status = r.status, "skipping provider catalog");
                        continue;
                    }
                    None => continue,
                };
                let listing: DataflowListing = decode(&url, &response)?;
                debug!(%provider, datasets = listing.link.item.len(), "fetched catalog");
                entries.extend(listing.link.item.into_iter().map(CatalogEntry::from));
            }
            Some(code) => {
                let url = format!(
                    "{}dataflow/{}/{}?format=JSON&compressed=true&lang={}",
                    provider.base_url(),
                    provider.agency(),
                    code,
                    language.code()
                );
                match client.fetch(&url, provider, false)? {
                    Some(response) if response.is_success() => {
                        let item: DataflowItem = decode(&url, &response)?;
                        entries.push(CatalogEntry::from(item));
                        break;
                    }
                    _ => debug!(%provider, code, "dataset not in provider catalog"),
                }
            }
        }
    }

    Ok(entries)
}

/// Entries whose title contains `keyword`, ignoring case.
pub fn subset_toc(entries: &[CatalogEntry], keyword: &str) -> Vec<CatalogEntry> {
    let keyword = keyword.to_lowercase();
    entries
        .iter()
        .filter(|e| e.title.to_lowercase().contains(&keyword))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eurostat::testing::{self, gzip, ok, ScriptedTransport};
    use std::rc::Rc;

    const GDP: &str = r#"{"label":"GDP and main components","class":"dataset","extension":{"id":"NAMA_10_GDP","agencyId":"ESTAT","annotation":[{"type":"OBS_PERIOD_OVERALL_LATEST","title":"2023"},{"type":"UPDATE_DATA","date":"2024-04-12T23:00:00+0200"},{"type":"OBS_PERIOD_OVERALL_OLDEST","title":"1975"},{"type":"UPDATE_STRUCTURE","date":"2024-03-01T11:00:00+0100"}]}}"#;

    fn all_url(provider: Provider) -> String {
        format!("{}dataflow/all?format=JSON&compressed=true&lang=en", provider.base_url())
    }

    #[test]
    fn test_entry_annotations_in_any_order() {
        let item: DataflowItem = serde_json::from_str(GDP).unwrap();
        let entry = CatalogEntry::from(item);
        assert_eq!(entry.code, "NAMA_10_GDP");
        assert_eq!(entry.kind, "dataset");
        assert_eq!(entry.data_start.as_deref(), Some("1975"));
        assert_eq!(entry.data_end.as_deref(), Some("2023"));
        assert_eq!(entry.last_update.as_deref(), Some("2024-04-12T23:00:00+0200"));
        assert_eq!(entry.to_record().len(), CatalogEntry::HEADER.len());
    }

    #[test]
    fn test_missing_annotations_stay_unset() {
        let item: DataflowItem =
            serde_json::from_str(r#"{"label":"Bare","class":"dataset","extension":{"id":"BARE"}}"#).unwrap();
        let entry = CatalogEntry::from(item);
        assert!(entry.last_update.is_none() && entry.data_end.is_none());
    }

    #[test]
    fn test_full_catalog_over_selected_providers() {
        let listing = format!(
            r#"{{"link":{{"item":[{},{}]}}}}"#,
            GDP,
            r#"{"label":"Unemployment by sex and age","class":"dataset","extension":{"id":"UNE_RT_M","annotation":[]}}"#
        );
        let transport = Rc::new(ScriptedTransport::new().on(all_url(Provider::Eurostat), ok("toc", gzip(&listing))));
        let client = testing::client(transport.clone());

        let entries = get_toc(&client, &[Provider::Eurostat, Provider::Grow], None, Language::En).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(transport.requests().last().unwrap(), &all_url(Provider::Grow));

        let subset = subset_toc(&entries, "UNEMPLOYMENT");
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].code, "UNE_RT_M");
    }

    #[test]
    fn test_single_dataset_stops_at_first_provider() {
        let comext = format!(
            "{}dataflow/ESTAT/NAMA_10_GDP?format=JSON&compressed=true&lang=en",
            Provider::Comext.base_url()
        );
        let transport = Rc::new(ScriptedTransport::new().on(comext.clone(), ok("toc", gzip(GDP))));
        let client = testing::client(transport.clone());

        let entries = get_toc(&client, &[], Some("NAMA_10_GDP"), Language::En).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(transport.requests().last().unwrap(), &comext);
        assert!(!transport.requests().iter().any(|u| u.starts_with(Provider::Comp.base_url())));
    }

    #[test]
    fn test_malformed_json() {
        let transport = Rc::new(ScriptedTransport::new().on(all_url(Provider::Eurostat), ok("toc", gzip("{\"link\":"))));
        let client = testing::client(transport);
        assert!(matches!(
            get_toc(&client, &[Provider::Eurostat], None, Language::En),
            Err(EurostatError::Json { .. })
        ));
    }
}
