//! Reshaping a wide extract into one date-indexed column per geography.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use regex::Regex;

use crate::common::DataTable;
use crate::error::SeriesError;

const GEO_COLUMNS: [&str; 2] = ["geo\\TIME_PERIOD", "geo"];

lazy_static! {
    static ref RE_PERIOD: Regex = Regex::new(r"^\d{4}(-\d{2})?$").unwrap();
}

fn is_period(name: &str) -> bool {
    RE_PERIOD.is_match(name.trim())
}

/// Period columns: yearly (`2020`) or monthly (`2020-03`).
pub fn detect_time_columns(periods: &[String]) -> Vec<&str> {
    periods.iter().map(|p| p.trim()).filter(|p| is_period(p)).collect()
}

/// First day of the year or month the period names.
pub fn parse_period(period: &str) -> Result<NaiveDate, SeriesError> {
    let invalid = || SeriesError::InvalidPeriod(period.to_owned());
    let period = period.trim();

    let (year, month) = match period.split_once('-') {
        Some((year, month)) => (year, month),
        None => (period, "1"),
    };
    let year = year.parse::<i32>().map_err(|_| invalid())?;
    let month = month.parse::<u32>().map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)
}

/// Which rows of an extract to keep, and how to name the resulting columns.
#[derive(Debug, Clone, Default)]
pub struct SeriesSpec {
    pub geos: Vec<String>,
    /// Dimension column and required value; filters on absent columns are ignored.
    pub filters: Vec<(String, String)>,
    /// Geography code and column name to use for it.
    pub rename: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideSeries {
    pub index: Vec<NaiveDate>,
    pub columns: Vec<String>,
    /// `values[row][column]`
    pub values: Vec<Vec<Option<f64>>>,
}

fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values.flatten().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

impl WideSeries {
    pub fn load(table: &DataTable, spec: &SeriesSpec) -> Result<WideSeries, SeriesError> {
        let geo = GEO_COLUMNS
            .iter()
            .find_map(|c| table.column_index(c))
            .ok_or(SeriesError::MissingGeoColumn)?;
        let filters: Vec<(usize, &str)> = spec
            .filters
            .iter()
            .filter_map(|(column, value)| table.column_index(column).map(|i| (i, value.as_str())))
            .collect();

        let time_columns: Vec<(usize, NaiveDate)> = table
            .periods
            .iter()
            .enumerate()
            .filter(|(_, p)| is_period(p))
            .map(|(i, p)| parse_period(p).map(|date| (i, date)))
            .collect::<Result<_, _>>()?;

        // geography -> observations of every matching row, per period
        let mut groups: BTreeMap<&str, Vec<Vec<Option<f64>>>> = BTreeMap::new();
        for row in &table.rows {
            let code = row.labels[geo].trim();
            if !spec.geos.iter().any(|g| g == code) {
                continue;
            }
            if !filters.iter().all(|(i, value)| row.labels[*i].trim() == *value) {
                continue;
            }
            let values = time_columns
                .iter()
                .map(|(i, _)| row.observations.get(*i).and_then(|o| o.as_f64()))
                .collect();
            groups.entry(code).or_default().push(values);
        }

        // one column per renamed geography, duplicates pooled
        let mut columns: Vec<String> = Vec::new();
        let mut pooled: Vec<Vec<Vec<Option<f64>>>> = Vec::new();
        for (code, rows) in &groups {
            let averaged: Vec<Option<f64>> = (0..time_columns.len())
                .map(|t| mean(rows.iter().map(|r| r[t])))
                .collect();
            let name = spec
                .rename
                .iter()
                .find(|(from, _)| from.as_str() == *code)
                .map(|(_, to)| to.clone())
                .unwrap_or_else(|| (*code).to_owned());
            match columns.iter().position(|c| *c == name) {
                Some(i) => pooled[i].push(averaged),
                None => {
                    columns.push(name);
                    pooled.push(vec![averaged]);
                }
            }
        }

        let mut order: Vec<usize> = (0..time_columns.len()).collect();
        order.sort_by_key(|&i| time_columns[i].1);

        let mut series = WideSeries {
            index: order.iter().map(|&i| time_columns[i].1).collect(),
            columns,
            values: order
                .iter()
                .map(|&t| pooled.iter().map(|rows| mean(rows.iter().map(|r| r[t]))).collect())
                .collect(),
        };
        series.drop_empty_columns();
        Ok(series)
    }

    fn drop_empty_columns(&mut self) {
        let keep: Vec<bool> = (0..self.columns.len())
            .map(|c| self.values.iter().any(|row| row[c].is_some()))
            .collect();
        let mut flags = keep.iter();
        self.columns.retain(|_| *flags.next().unwrap_or(&false));
        for row in &mut self.values {
            let mut flags = keep.iter();
            row.retain(|_| *flags.next().unwrap_or(&false));
        }
    }

    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let c = self.columns.iter().position(|n| n == name)?;
        Some(self.values.iter().map(|row| row[c]).collect())
    }

    /// Last non-empty value of `column`.
    pub fn latest(&self, column: &str) -> Option<f64> {
        self.column(column)?.into_iter().flatten().last()
    }

    /// Percentage change between the last non-empty value and the one `periods`
    /// non-empty values before it.
    pub fn year_over_year(&self, column: &str, periods: usize) -> Option<f64> {
        let values: Vec<f64> = self.column(column)?.into_iter().flatten().collect();
        if values.len() < periods + 1 {
            return None;
        }
        let last = values[values.len() - 1];
        let base = values[values.len() - 1 - periods];
        Some((last / base - 1.0) * 100.0)
    }

    /// `numerator * scale / denominator` on the dates and columns both frames share.
    pub fn ratio(numerator: &WideSeries, denominator: &WideSeries, scale: f64) -> WideSeries {
        let rows: Vec<(usize, usize)> = numerator
            .index
            .iter()
            .enumerate()
            .filter_map(|(i, date)| denominator.index.iter().position(|d| d == date).map(|j| (i, j)))
            .collect();
        let columns: Vec<(usize, usize)> = numerator
            .columns
            .iter()
            .enumerate()
            .filter_map(|(i, name)| denominator.columns.iter().position(|n| n == name).map(|j| (i, j)))
            .collect();

        let mut series = WideSeries {
            index: rows.iter().map(|&(i, _)| numerator.index[i]).collect(),
            columns: columns.iter().map(|&(i, _)| numerator.columns[i].clone()).collect(),
            values: rows
                .iter()
                .map(|&(ri, rj)| {
                    columns
                        .iter()
                        .map(|&(ci, cj)| match (numerator.values[ri][ci], denominator.values[rj][cj]) {
                            (Some(n), Some(d)) if d != 0.0 => Some(n * scale / d),
                            _ => None,
                        })
                        .collect()
                })
                .collect(),
        };
        series.drop_empty_columns();
        series
    }

    /// Header (`date` plus column names) followed by one record per date.
    pub fn records(&self) -> Vec<Vec<String>> {
        let mut header = vec!["date".to_owned()];
        header.extend(self.columns.iter().cloned());

        let mut records = vec![header];
        for (date, row) in self.index.iter().zip(&self.values) {
            let mut record = vec![date.format("%Y-%m-%d").to_string()];
            record.extend(row.iter().map(|v| v.map(|v| v.to_string()).unwrap_or_default()));
            records.push(record);
        }
        records
    }
}
