use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::reply::number;

/// A column-named table of numbers, one row per time bin.
///
/// Serialises to the same `{"columns": [...], "data": [[...]]}` shape the
/// API uses on the wire. Missing cells are stored as NaN.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<String>,
    #[serde(rename = "data")]
    rows: Vec<Vec<f64>>,
}

/// Serialised form of [`Table`]; NaN cells come back as `null`.
#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    data: Vec<Vec<Option<f64>>>,
}

impl TryFrom<RawTable> for Table {
    type Error = Error;

    fn try_from(raw: RawTable) -> Result<Self> {
        let rows = raw
            .data
            .into_iter()
            .map(|r| r.into_iter().map(|c| c.unwrap_or(f64::NAN)).collect())
            .collect();
        Table::new(raw.columns, rows)
    }
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != columns.len())
        {
            return Err(Error::malformed(
                "table",
                format!(
                    "row {i} has {} value(s) but there are {} column(s)",
                    row.len(),
                    columns.len()
                ),
            ));
        }
        Ok(Self { columns, rows })
    }

    pub(crate) fn from_wire(v: &Value, context: &str) -> Result<Self> {
        let Value::Object(map) = v else {
            return Err(Error::malformed(context, "table is not an object"));
        };
        let missing: Vec<String> = ["columns", "data"]
            .iter()
            .filter(|k| !map.contains_key(**k))
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingKeys {
                context: context.to_string(),
                keys: missing,
            });
        }

        let columns = match &map["columns"] {
            Value::Array(cols) => cols
                .iter()
                .map(|c| {
                    c.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| Error::malformed(context, "column names must be strings"))
                })
                .collect::<Result<Vec<_>>>()?,
            _ => return Err(Error::malformed(context, "columns is not a list")),
        };

        let Value::Array(data) = &map["data"] else {
            return Err(Error::malformed(context, "data is not a list"));
        };
        let mut rows = Vec::with_capacity(data.len());
        for (i, row) in data.iter().enumerate() {
            let Value::Array(cells) = row else {
                return Err(Error::malformed(context, format!("row {i} is not a list")));
            };
            let row = cells
                .iter()
                .map(|c| {
                    number(c).ok_or_else(|| {
                        Error::malformed(context, format!("row {i} holds a non-numeric value"))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push(row);
        }

        Table::new(columns, rows).map_err(|e| match e {
            Error::Malformed { detail, .. } => Error::malformed(context, detail),
            other => other,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let i = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[i]).collect())
    }

    pub fn value(&self, row: usize, name: &str) -> Option<f64> {
        let i = self.column_index(name)?;
        self.rows.get(row).map(|r| r[i])
    }

    /// A new table holding only the rows for which `keep` returns true.
    pub fn filter_rows<F: FnMut(&[f64]) -> bool>(&self, mut keep: F) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// A new table holding the given column indices, in the given order.
    pub(crate) fn project(&self, indices: &[usize]) -> Table {
        Table {
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| indices.iter().map(|&i| r[i]).collect())
                .collect(),
        }
    }
}
