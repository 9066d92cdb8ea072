use std::fmt;

/// Value half of one observation cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ObsValue {
    Missing,
    Number(f64),
    Raw(String), // cell text that is neither a number nor a missing marker, kept verbatim
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: ObsValue,
    pub flag: Option<String>,
}

impl Observation {
    pub fn missing() -> Observation {
        Observation { value: ObsValue::Missing, flag: None }
    }

    pub fn number(value: f64, flag: Option<String>) -> Observation {
        Observation { value: ObsValue::Number(value), flag }
    }

    pub fn raw(text: &str) -> Observation {
        Observation { value: ObsValue::Raw(text.to_owned()), flag: None }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            ObsValue::Number(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub labels: Vec<String>,
    pub observations: Vec<Observation>,
}

/// A rendered table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Number(v) => write!(f, "{}", v),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A dataset in the wide layout of the TSV extract: leading dimension columns,
/// then one group of columns per time period in server order.
///
/// A period group is one column (`<period>`) or, with flags, two columns
/// (`<period>_value`, `<period>_flag`).
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    pub dimensions: Vec<String>,
    pub periods: Vec<String>,
    pub flags: bool,
    pub rows: Vec<DataRow>,
}

impl DataTable {
    pub fn new(dimensions: Vec<String>, periods: Vec<String>, flags: bool) -> DataTable {
        DataTable {
            dimensions,
            periods,
            flags,
            rows: Vec::new(),
        }
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = self.dimensions.clone();
        for period in &self.periods {
            if self.flags {
                header.push(format!("{}_value", period));
                header.push(format!("{}_flag", period));
            } else {
                header.push(period.clone());
            }
        }
        header
    }

    pub fn width(&self) -> usize {
        self.dimensions.len() + self.periods.len() * if self.flags { 2 } else { 1 }
    }

    pub fn cells(&self, row: &DataRow) -> Vec<Cell> {
        let mut cells: Vec<Cell> = row.labels.iter().map(|l| Cell::Text(l.clone())).collect();
        for observation in &row.observations {
            cells.push(match &observation.value {
                ObsValue::Missing => Cell::Null,
                ObsValue::Number(v) => Cell::Number(*v),
                ObsValue::Raw(s) => Cell::Text(s.clone()),
            });
            if self.flags {
                cells.push(match &observation.flag {
                    Some(flag) => Cell::Text(flag.clone()),
                    None => Cell::Null,
                });
            }
        }
        cells
    }

    /// Header first, then every row rendered as strings.
    pub fn records(&self) -> Vec<Vec<String>> {
        let mut records = vec![self.header()];
        for row in &self.rows {
            records.push(self.cells(row).iter().map(|c| c.to_string()).collect());
        }
        records
    }

    pub fn column_index(&self, dimension: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.trim() == dimension)
    }

    /// Flips period order in the header and every row; flags move with their value.
    pub fn reverse_time(&mut self) {
        self.periods.reverse();
        for row in &mut self.rows {
            row.observations.reverse();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
