//! Bulk download of a dataset as compressed TSV, split into one request per
//! combination of filter values.

use regex::Regex;
use tracing::{debug, info, warn};

use super::fetch::Client;
use super::structure::{self, Detail};
use super::{gunzip, Language};
use crate::common::{DataRow, DataTable, Observation};
use crate::error::{EurostatError, Result};

const START_PERIOD: &str = "startPeriod";
const END_PERIOD: &str = "endPeriod";

const NULL_MARKERS: [&str; 3] = [":", "0n", "n"];

/// Dimension filters in insertion order, plus the two time bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    dimensions: Vec<(String, Vec<String>)>,
    pub start_period: Option<String>,
    pub end_period: Option<String>,
}

impl Filters {
    pub fn new() -> Filters {
        Filters::default()
    }

    /// `startPeriod` and `endPeriod` set the time bounds (first value wins);
    /// any other key is a dimension filter, replacing earlier values for that key.
    pub fn insert<I, S>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        match key {
            START_PERIOD => self.start_period = values.into_iter().next(),
            END_PERIOD => self.end_period = values.into_iter().next(),
            _ => match self.dimensions.iter_mut().find(|(k, _)| k == key) {
                Some((_, existing)) => *existing = values,
                None => self.dimensions.push((key.to_owned(), values)),
            },
        }
    }

    pub fn with<I, S>(mut self, key: &str, values: I) -> Filters
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(key, values);
        self
    }

    pub fn dimensions(&self) -> &[(String, Vec<String>)] {
        &self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty() && self.start_period.is_none() && self.end_period.is_none()
    }

    fn time_query(&self) -> String {
        let mut query = String::new();
        if let Some(start) = &self.start_period {
            query.push_str(&format!("{}={}&", START_PERIOD, start));
        }
        if let Some(end) = &self.end_period {
            query.push_str(&format!("{}={}&", END_PERIOD, end));
        }
        query
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataRequest {
    /// Keep observation flags, rendering each period as a value and a flag column.
    pub flags: bool,
    pub filters: Filters,
    /// Log download progress after each fragment.
    pub verbose: bool,
    pub reverse_time: bool,
}

/// One path-and-query suffix per combination of dimension filter values.
///
/// `ordered_dimensions` are the dataset's dimension ids by position; the series
/// key has one segment per dimension, empty when that dimension is unfiltered.
pub fn build_fragments(filters: &Filters, ordered_dimensions: &[&str]) -> Vec<String> {
    let time = filters.time_query();
    let selected: Vec<&(String, Vec<String>)> = filters
        .dimensions()
        .iter()
        .filter(|(key, _)| {
            let known = ordered_dimensions.contains(&key.as_str());
            if !known {
                debug!(dimension = %key, "ignoring filter on unknown dimension");
            }
            known
        })
        .collect();

    if selected.is_empty() {
        return vec![format!("?{}", time)];
    }

    let mut combinations: Vec<Vec<(&str, &str)>> = vec![Vec::new()];
    for (dimension, values) in selected {
        combinations = combinations
            .into_iter()
            .flat_map(|combination| {
                values.iter().map(move |value| {
                    let mut next = combination.clone();
                    next.push((dimension.as_str(), value.as_str()));
                    next
                })
            })
            .collect();
    }

    combinations
        .iter()
        .map(|combination| {
            let key: Vec<&str> = ordered_dimensions
                .iter()
                .map(|id| {
                    combination
                        .iter()
                        .find(|(dimension, _)| dimension == id)
                        .map(|(_, value)| *value)
                        .unwrap_or("")
                })
                .collect();
            format!("/{}?{}", key.join("."), time)
        })
        .collect()
}

/// Reads one observation cell: a value, a null marker, or either followed by a flag.
pub fn parse_observation(cell: &str) -> Result<Observation> {
    let tokens: Vec<&str> = cell.split_whitespace().collect();

    match tokens.as_slice() {
        [] => Ok(Observation::raw(cell)),
        [marker] if NULL_MARKERS.contains(marker) => Ok(Observation::missing()),
        [marker, flag] if NULL_MARKERS.contains(marker) => Ok(Observation {
            flag: Some(format!("{} {}", marker, flag)),
            ..Observation::missing()
        }),
        [marker, ..] if NULL_MARKERS.contains(marker) => Err(EurostatError::ObservationParse {
            cell: cell.to_owned(),
            reason: "too many tokens after missing-value marker".to_owned(),
        }),
        [first, rest @ ..] => match first.parse::<f64>() {
            Ok(value) => Ok(Observation::number(value, rest.first().map(|f| (*f).to_owned()))),
            Err(_) if rest.len() > 1 => Err(EurostatError::ObservationParse {
                cell: cell.to_owned(),
                reason: "unparseable value followed by more than one token".to_owned(),
            }),
            Err(_) => Ok(Observation::raw(cell)),
        },
    }
}

/// Parses one decompressed TSV extract. `None` when the text has no header line.
pub fn parse_extract(text: &str, flags: bool) -> Result<Option<DataTable>> {
    lazy_static! {
        static ref RE_FIELD_SEPARATOR: Regex = Regex::new(r"[\t,]").unwrap();
    }

    let mut lines = text.lines().filter(|l| !l.is_empty());
    let header = match lines.next() {
        Some(h) => h,
        None => return Ok(None),
    };

    let leading = header.split('\t').next().unwrap_or("");
    let text_fields = leading.matches(',').count() + 1;

    let fields: Vec<&str> = RE_FIELD_SEPARATOR.split(header).collect();
    let split = text_fields.min(fields.len());
    let dimensions = fields[..split]
        .iter()
        .map(|f| if flags { (*f).to_owned() } else { f.trim().to_owned() })
        .collect();
    let periods: Vec<String> = fields[split..].iter().map(|f| f.trim().to_owned()).collect();

    let mut table = DataTable::new(dimensions, periods, flags);
    for line in lines {
        let cells: Vec<&str> = RE_FIELD_SEPARATOR.split(line).collect();
        if cells.len() != text_fields + table.periods.len() {
            return Err(EurostatError::ObservationParse {
                cell: line.to_owned(),
                reason: format!(
                    "row has {} fields, header has {}",
                    cells.len(),
                    text_fields + table.periods.len()
                ),
            });
        }

        let labels = cells[..text_fields].iter().map(|c| (*c).to_owned()).collect();
        let mut observations = Vec::with_capacity(table.periods.len());
        for cell in &cells[text_fields..] {
            let mut observation = parse_observation(cell)?;
            if !flags {
                observation.flag = None;
            }
            observations.push(observation);
        }
        table.rows.push(DataRow { labels, observations });
    }

    Ok(Some(table))
}

/// Appends `extra`'s rows to `table`, lining observations up by period name.
fn merge_rows(table: &mut DataTable, extra: DataTable) {
    let positions: Vec<Option<usize>> = table
        .periods
        .iter()
        .map(|p| extra.periods.iter().position(|q| q == p))
        .collect();

    let dropped = extra.periods.iter().filter(|p| !table.periods.contains(p)).count();
    if dropped > 0 {
        warn!(dropped, "fragment has periods outside the first header, dropping them");
    }

    for row in extra.rows {
        let observations = positions
            .iter()
            .map(|pos| match pos {
                Some(i) => row.observations[*i].clone(),
                None => Observation::missing(),
            })
            .collect();
        table.rows.push(DataRow { labels: row.labels, observations });
    }
}

/// Downloads `code`, one request per fragment, and merges the extracts into one
/// table. `None` when no fragment returned any data row.
pub fn get_data(client: &Client, code: &str, request: &DataRequest) -> Result<Option<DataTable>> {
    let resolution = structure::resolve(client, code, Detail::Order, Language::default())?;
    let provider = resolution.provider;
    let fragments = build_fragments(&request.filters, &resolution.ordered_ids());
    debug!(code, %provider, fragments = fragments.len(), "downloading dataset");

    let mut merged: Option<DataTable> = None;
    for (done, fragment) in fragments.iter().enumerate() {
        let url = format!(
            "{}data/{}{}format=TSV&compressed=true",
            provider.base_url(),
            code,
            fragment
        );

        if let Some(response) = client.fetch_ok(&url, provider)? {
            let text = gunzip(&url, &response.body)?;
            if let Some(extract) = parse_extract(&text, request.flags)? {
                // the header comes from the first fragment with rows
                let seeded = merged.as_ref().map_or(false, |t| !t.rows.is_empty());
                match merged.as_mut() {
                    Some(table) if seeded => merge_rows(table, extract),
                    _ => merged = Some(extract),
                }
            }
        } else {
            debug!(url = %url, "no data for fragment");
        }

        if request.verbose {
            info!(
                "Download progress: {:.1}%",
                (done + 1) as f64 / fragments.len() as f64 * 100.0
            );
        }
    }

    let mut table = match merged {
        Some(t) if !t.is_empty() => t,
        _ => return Ok(None),
    };
    if request.reverse_time {
        table.reverse_time();
    }
    Ok(Some(table))
}
