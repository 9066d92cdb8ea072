//! Finding which provider owns a dataset, and reading its dimensions.

use tracing::{debug, error};

use super::fetch::{parse_xml, Client};
use super::xml::Element;
use super::{Language, Provider};
use crate::error::{EurostatError, Result};

const DSD_REF_PATH: &str = "Structures/Dataflows/Dataflow/Structure/Ref";
const DIMENSION_PATH: &str =
    "Structures/DataStructures/DataStructure/DataStructureComponents/DimensionList/Dimension";
const CODELIST_REF_PATH: &str = "LocalRepresentation/Enumeration/Ref";
const CODELIST_PATH: &str = "Structures/Codelists/Codelist";

/// How much to read about each dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// Ids only.
    Name,
    /// Id and codelist reference.
    Basic,
    /// Id and position.
    Order,
    /// Id, codelist reference, localized name and description.
    Descr,
    /// Provider and agency only; the structure is not fetched.
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dimension {
    pub id: String,
    pub position: Option<u32>,
    pub codelist: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub agency: &'static str,
    pub provider: Provider,
    pub dimensions: Vec<Dimension>,
}

impl Resolution {
    /// Dimension ids sorted by declared position.
    pub fn ordered_ids(&self) -> Vec<&str> {
        let mut dims: Vec<&Dimension> = self.dimensions.iter().collect();
        dims.sort_by_key(|d| d.position.unwrap_or(u32::MAX));
        dims.into_iter().map(|d| d.id.as_str()).collect()
    }

    pub fn dimension(&self, id: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.id.eq_ignore_ascii_case(id))
    }
}

/// Dataflow lookup under one provider. `Ok(None)` means the dataset is not there.
fn try_candidate(client: &Client, provider: Provider, code: &str, detail: Detail) -> Result<Option<Element>> {
    let tail = if detail == Detail::Descr {
        "/latest?detail=referencepartial&references=descendants"
    } else {
        "/latest"
    };
    let url = format!("{}dataflow/{}/{}{}", provider.base_url(), provider.agency(), code, tail);

    let response = match client.fetch(&url, provider, false) {
        Ok(Some(r)) if r.is_success() => r,
        Ok(_) => return Ok(None),
        Err(e @ EurostatError::ServiceUnavailable { .. }) => return Err(e),
        Err(e) => {
            debug!(%provider, code, error = %e, "dataflow lookup failed");
            return Ok(None);
        }
    };

    match Element::parse(&response.body) {
        Ok(root) if root.find(DSD_REF_PATH).and_then(|r| r.attr("id")).is_some() => Ok(Some(root)),
        _ => Ok(None),
    }
}

/// Finds the first provider, in declared order, that publishes `code`, then reads
/// the dimensions of its data structure at the requested `detail`.
pub fn resolve(client: &Client, code: &str, detail: Detail, language: Language) -> Result<Resolution> {
    let mut found = None;
    for provider in Provider::ALL.iter().copied() {
        if let Some(dataflow) = try_candidate(client, provider, code, detail)? {
            found = Some((provider, dataflow));
            break;
        }
    }

    let (provider, dataflow) = match found {
        Some(f) => f,
        None => {
            error!("Dataset not found: {}", code);
            return Err(EurostatError::DatasetNotFound { code: code.to_owned() });
        }
    };
    debug!(code, %provider, "resolved dataset");

    let mut resolution = Resolution {
        agency: provider.agency(),
        provider,
        dimensions: Vec::new(),
    };
    if detail == Detail::Empty {
        return Ok(resolution);
    }

    let dsd = dataflow
        .find(DSD_REF_PATH)
        .and_then(|r| r.attr("id"))
        .unwrap_or_default();
    let url = format!(
        "{}datastructure/{}/{}/latest",
        provider.base_url(),
        provider.agency(),
        dsd
    );
    let response = client
        .fetch_ok(&url, provider)?
        .ok_or_else(|| EurostatError::Protocol { url: url.clone(), reason: "empty data structure".to_owned() })?;
    let structure = parse_xml(&url, &response.body)?;

    let codelists = dataflow.find_all(CODELIST_PATH);
    for element in structure.find_all(DIMENSION_PATH) {
        resolution
            .dimensions
            .push(read_dimension(&url, element, detail, language, &codelists)?);
    }

    Ok(resolution)
}

fn read_dimension(
    url: &str,
    element: &Element,
    detail: Detail,
    language: Language,
    codelists: &[&Element],
) -> Result<Dimension> {
    let missing = |what: &str| EurostatError::Protocol {
        url: url.to_owned(),
        reason: format!("dimension without {}", what),
    };

    let mut dimension = Dimension {
        id: element.attr("id").ok_or_else(|| missing("id"))?.to_owned(),
        ..Dimension::default()
    };

    let codelist = element.find(CODELIST_REF_PATH).and_then(|r| r.attr("id"));

    match detail {
        Detail::Name | Detail::Empty => {}
        Detail::Order => {
            let position = element
                .attr("position")
                .and_then(|p| p.trim().parse::<u32>().ok())
                .ok_or_else(|| missing("position"))?;
            dimension.position = Some(position);
        }
        Detail::Basic => {
            dimension.codelist = Some(codelist.ok_or_else(|| missing("codelist reference"))?.to_owned());
        }
        Detail::Descr => {
            let codelist = codelist.ok_or_else(|| missing("codelist reference"))?;
            if let Some(list) = codelists.iter().find(|c| c.attr("id") == Some(codelist)) {
                let localized = list
                    .children_named("Name")
                    .find(|n| n.attr("xml:lang") == Some(language.code()))
                    .or_else(|| list.children_named("Name").next());
                dimension.name = localized.map(|n| n.text.clone());
                dimension.description = list.children_named("Description").next().map(|d| d.text.clone());
            }
            dimension.codelist = Some(codelist.to_owned());
        }
    }

    Ok(dimension)
}
