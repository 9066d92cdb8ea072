use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, error};

use super::fetch::{parse_xml, Client};
use super::structure::{self, Detail};
use super::{gunzip, Language};
use crate::error::{EurostatError, Result};

const KEY_VALUE_PATH: &str = "Structures/Constraints/ContentConstraint/CubeRegion/KeyValue";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryForm {
    List,
    Dict,
    Table,
}

impl Default for DictionaryForm {
    fn default() -> Self {
        DictionaryForm::List
    }
}

impl FromStr for DictionaryForm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "list" => Ok(DictionaryForm::List),
            "dict" => Ok(DictionaryForm::Dict),
            "table" | "df" => Ok(DictionaryForm::Table),
            q => Err(format!("Unknown dictionary format: {} (expected list, dict or table)", q)),
        }
    }
}

/// Value of a dictionary keyed by code: a bare label for parameter values,
/// name and description for dimensions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Label {
    Text(String),
    Described { name: String, descr: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Dictionary {
    List(Vec<Vec<String>>),
    Map(BTreeMap<String, Label>),
    Table(LabelTable),
}

impl Dictionary {
    /// Header and rows, whatever the form.
    pub fn to_table(&self) -> LabelTable {
        match self {
            Dictionary::Table(t) => t.clone(),
            Dictionary::List(rows) => LabelTable {
                columns: Vec::new(),
                rows: rows.clone(),
            },
            Dictionary::Map(map) => LabelTable {
                columns: Vec::new(),
                rows: map
                    .iter()
                    .map(|(key, label)| match label {
                        Label::Text(text) => vec![key.clone(), text.clone()],
                        Label::Described { name, descr } => vec![key.clone(), name.clone(), descr.clone()],
                    })
                    .collect(),
            },
        }
    }
}

/// Dimension ids of `code`.
pub fn get_pars(client: &Client, code: &str) -> Result<Vec<String>> {
    let resolution = structure::resolve(client, code, Detail::Name, Language::default())?;
    Ok(resolution.dimensions.into_iter().map(|d| d.id).collect())
}

/// Values of dimension `par` actually used by `code`, from its content constraint.
pub fn get_par_values(client: &Client, code: &str, par: &str) -> Result<Vec<String>> {
    let resolution = structure::resolve(client, code, Detail::Empty, Language::default())?;
    let provider = resolution.provider;
    let url = format!(
        "{}contentconstraint/{}/{}",
        provider.base_url(),
        resolution.agency,
        code
    );

    let response = match client.fetch_ok(&url, provider)? {
        Some(r) => r,
        None => return Ok(Vec::new()),
    };
    let root = parse_xml(&url, &response.body)?;

    Ok(root
        .find_all(KEY_VALUE_PATH)
        .into_iter()
        .filter(|kv| kv.attr("id").map_or(false, |id| id.eq_ignore_ascii_case(par)))
        .flat_map(|kv| kv.children_named("Value").map(|v| v.text.clone()))
        .collect())
}

/// Labels for the codes of dimension `par`, or for the dimensions themselves when
/// `par` is `None`. With `full` false only codes used by the dataset are kept.
pub fn get_dic(
    client: &Client,
    code: &str,
    par: Option<&str>,
    form: DictionaryForm,
    full: bool,
    language: Language,
) -> Result<Dictionary> {
    let (columns, rows) = match par {
        Some(par) => (vec!["val", "descr"], code_labels(client, code, par, full, language)?),
        None => (vec!["dim", "name", "descr"], dimension_labels(client, code, language)?),
    };

    Ok(match form {
        DictionaryForm::List => Dictionary::List(rows),
        DictionaryForm::Table => Dictionary::Table(LabelTable {
            columns: columns.into_iter().map(String::from).collect(),
            rows,
        }),
        DictionaryForm::Dict => Dictionary::Map(
            rows.into_iter()
                .filter_map(|mut row| {
                    if row.is_empty() {
                        return None;
                    }
                    let key = row.remove(0);
                    let label = if par.is_some() {
                        Label::Text(row.into_iter().next().unwrap_or_default())
                    } else {
                        let mut rest = row.into_iter();
                        Label::Described {
                            name: rest.next().unwrap_or_default(),
                            descr: rest.next().unwrap_or_default(),
                        }
                    };
                    Some((key, label))
                })
                .collect(),
        ),
    })
}

fn code_labels(client: &Client, code: &str, par: &str, full: bool, language: Language) -> Result<Vec<Vec<String>>> {
    let resolution = structure::resolve(client, code, Detail::Basic, language)?;
    let codelist = match resolution.dimension(par).and_then(|d| d.codelist.clone()) {
        Some(c) => c,
        None => {
            error!("{} not in {}", par, code);
            return Err(EurostatError::DimensionNotFound {
                code: code.to_owned(),
                dimension: par.to_owned(),
            });
        }
    };

    let provider = resolution.provider;
    let url = format!(
        "{}codelist/{}/{}/latest?format=TSV&compressed=true&lang={}",
        provider.base_url(),
        resolution.agency,
        codelist,
        language.code()
    );
    let response = client
        .fetch_ok(&url, provider)?
        .ok_or_else(|| EurostatError::Protocol { url: url.clone(), reason: "empty codelist".to_owned() })?;
    let text = gunzip(&url, &response.body)?;

    let mut rows: Vec<Vec<String>> = text
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.split('\t').map(String::from).collect())
        .collect();
    debug!(codelist = %codelist, codes = rows.len(), "fetched codelist");

    if !full {
        let used = get_par_values(client, code, par)?;
        rows.retain(|row| row.first().map_or(false, |c| used.contains(c)));
    }
    Ok(rows)
}

fn dimension_labels(client: &Client, code: &str, language: Language) -> Result<Vec<Vec<String>>> {
    let resolution = structure::resolve(client, code, Detail::Descr, language)?;
    Ok(resolution
        .dimensions
        .into_iter()
        .map(|d| vec![d.id, d.name.unwrap_or_default(), d.description.unwrap_or_default()])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eurostat::testing::{self, gzip, ok, ScriptedTransport};
    use crate::eurostat::Provider;
    use std::rc::Rc;

    const CODE: &str = "nama_10_gdp";

    fn constraint_url() -> String {
        format!("{}contentconstraint/ESTAT/{}", Provider::Eurostat.base_url(), CODE)
    }

    fn geo_codelist_url(lang: &str) -> String {
        format!(
            "{}codelist/ESTAT/GEO/latest?format=TSV&compressed=true&lang={}",
            Provider::Eurostat.base_url(),
            lang
        )
    }

    const CONSTRAINT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<m:Structure xmlns:m="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message" xmlns:s="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure" xmlns:c="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common">
<m:Structures><s:Constraints><s:ContentConstraint id="NAMA_10_GDP" type="Actual"><s:CubeRegion include="true">
<c:KeyValue id="freq"><c:Value>A</c:Value></c:KeyValue>
<c:KeyValue id="GEO"><c:Value>SE</c:Value><c:Value>DE</c:Value></c:KeyValue>
</s:CubeRegion></s:ContentConstraint></s:Constraints></m:Structures></m:Structure>"#;

    fn scripted() -> Rc<ScriptedTransport> {
        Rc::new(
            testing::with_nama_structure(ScriptedTransport::new(), CODE)
                .on(constraint_url(), ok("cc", CONSTRAINT))
                .on(
                    geo_codelist_url("en"),
                    ok("cl", gzip("SE\tSweden\r\nDE\tGermany\r\nFR\tFrance\r\n")),
                ),
        )
    }

    #[test]
    fn test_pars_and_values() {
        let client = testing::client(scripted());
        assert_eq!(get_pars(&client, CODE).unwrap(), vec!["freq", "unit", "geo"]);
        assert_eq!(get_par_values(&client, CODE, "geo").unwrap(), vec!["SE", "DE"]);
        assert!(get_par_values(&client, CODE, "unit").unwrap().is_empty());
    }

    #[test]
    fn test_code_labels_full_and_used_only() {
        let client = testing::client(scripted());

        let full = get_dic(&client, CODE, Some("GEO"), DictionaryForm::List, true, Language::En).unwrap();
        assert_eq!(full.to_table().rows.len(), 3);

        let used = get_dic(&client, CODE, Some("geo"), DictionaryForm::Table, false, Language::En).unwrap();
        assert_eq!(
            used,
            Dictionary::Table(LabelTable {
                columns: vec!["val".to_owned(), "descr".to_owned()],
                rows: vec![
                    vec!["SE".to_owned(), "Sweden".to_owned()],
                    vec!["DE".to_owned(), "Germany".to_owned()],
                ],
            })
        );
    }

    #[test]
    fn test_dict_form() {
        let client = testing::client(scripted());
        match get_dic(&client, CODE, Some("geo"), DictionaryForm::Dict, true, Language::En).unwrap() {
            Dictionary::Map(map) => assert_eq!(map.get("FR"), Some(&Label::Text("France".to_owned()))),
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dimension() {
        let client = testing::client(scripted());
        assert!(matches!(
            get_dic(&client, CODE, Some("sector"), DictionaryForm::List, true, Language::En),
            Err(EurostatError::DimensionNotFound { dimension, .. }) if dimension == "sector"
        ));
    }

    #[test]
    fn test_dimension_descriptions() {
        let codelists: &[(&str, &[(&str, &str)], &str)] = &[("GEO", &[("de", "Geopolitische Einheit")], "Länder")];
        let transport = Rc::new(
            ScriptedTransport::new()
                .on(
                    testing::dataflow_descr_url(Provider::Eurostat, CODE),
                    ok("df", testing::dataflow_xml(CODE, "NAMA_10_GDP", codelists)),
                )
                .on(
                    testing::datastructure_url(Provider::Eurostat, "NAMA_10_GDP"),
                    ok("dsd", testing::datastructure_xml("NAMA_10_GDP", &[("freq", 1, "FREQ"), ("geo", 2, "GEO")])),
                ),
        );
        let client = testing::client(transport);

        let dic = get_dic(&client, CODE, None, DictionaryForm::Dict, true, Language::De).unwrap();
        match dic {
            Dictionary::Map(map) => {
                assert_eq!(
                    map.get("geo"),
                    Some(&Label::Described { name: "Geopolitische Einheit".to_owned(), descr: "Länder".to_owned() })
                );
                assert_eq!(
                    map.get("freq"),
                    Some(&Label::Described { name: String::new(), descr: String::new() })
                );
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_form_from_str() {
        assert_eq!("df".parse::<DictionaryForm>().unwrap(), DictionaryForm::Table);
        assert!("csv".parse::<DictionaryForm>().is_err());
    }
}
