// Copyright © 2025 Flowbench

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use super::error::{Error, Result};
use super::value::{Row, Type, Value};

/// Optional value-range metadata attached to a column.
///
/// Domains are advisory. They never make a row invalid; they only describe
/// what has been seen or declared so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub lower: Option<Value>,
    pub upper: Option<Value>,
    pub possible_values: Option<BTreeSet<ArcStr>>,
}

impl Domain {
    pub fn is_empty(&self) -> bool {
        self.lower.is_none() && self.upper.is_none() && self.possible_values.is_none()
    }

    /// Widens this domain to admit `value`.
    pub fn expand(&mut self, value: &Value) {
        if value.is_missing() {
            return;
        }
        if let Value::String(s) = value {
            self.possible_values
                .get_or_insert_with(BTreeSet::new)
                .insert(s.clone());
            return;
        }
        let widen_lower = match &self.lower {
            None => true,
            Some(lower) => matches!(value.try_cmp(lower), Some(std::cmp::Ordering::Less)),
        };
        if widen_lower {
            self.lower = Some(value.clone());
        }
        let widen_upper = match &self.upper {
            None => true,
            Some(upper) => matches!(value.try_cmp(upper), Some(std::cmp::Ordering::Greater)),
        };
        if widen_upper {
            self.upper = Some(value.clone());
        }
    }

    /// Union of two domains. Unknown bounds stay unknown.
    pub fn merge(&self, other: &Self) -> Self {
        let lower = match (&self.lower, &other.lower) {
            (Some(a), Some(b)) => {
                if matches!(b.try_cmp(a), Some(std::cmp::Ordering::Less)) {
                    Some(b.clone())
                } else {
                    Some(a.clone())
                }
            }
            _ => None,
        };
        let upper = match (&self.upper, &other.upper) {
            (Some(a), Some(b)) => {
                if matches!(b.try_cmp(a), Some(std::cmp::Ordering::Greater)) {
                    Some(b.clone())
                } else {
                    Some(a.clone())
                }
            }
            _ => None,
        };
        let possible_values = match (&self.possible_values, &other.possible_values) {
            (Some(a), Some(b)) => Some(a.union(b).cloned().collect()),
            _ => None,
        };
        Self {
            lower,
            upper,
            possible_values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: ArcStr,
    pub dtype: Type,
    pub domain: Domain,
}

impl ColumnSpec {
    pub fn new(name: impl Into<ArcStr>, dtype: Type) -> Self {
        Self {
            name: name.into(),
            dtype,
            domain: Domain::default(),
        }
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }
}

/// An ordered list of uniquely named columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    columns: Arc<Vec<ColumnSpec>>,
}

impl TableSpec {
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.clone()) {
                return Err(Error::DuplicateColumnName(column.name.clone()));
            }
        }
        Ok(Self {
            columns: Arc::new(columns),
        })
    }

    pub fn empty() -> Self {
        Self {
            columns: Arc::new(Vec::new()),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Structural equality: same names and types in the same order.
    /// Domains are ignored.
    pub fn equal_structure(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.name == b.name && a.dtype == b.dtype)
    }

    pub fn without_domains(&self) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| ColumnSpec::new(c.name.clone(), c.dtype))
            .collect();
        Self {
            columns: Arc::new(columns),
        }
    }

    /// Merged spec for concatenation. Same-name columns must agree on type
    /// and have their domains merged; columns unique to either side are
    /// appended with their domain intact.
    pub fn union(&self, other: &Self) -> Result<Self> {
        let mut columns: Vec<ColumnSpec> = Vec::with_capacity(self.columns.len());
        let other_index: HashMap<&ArcStr, usize> = other
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (&c.name, i))
            .collect();
        for column in self.columns.iter() {
            match other_index.get(&column.name) {
                Some(&i) => {
                    let counterpart = &other.columns[i];
                    if counterpart.dtype != column.dtype {
                        return Err(Error::ColumnTypeMismatch {
                            column: column.name.clone(),
                            expected: column.dtype,
                            actual: counterpart.dtype,
                        });
                    }
                    columns.push(ColumnSpec {
                        name: column.name.clone(),
                        dtype: column.dtype,
                        domain: column.domain.merge(&counterpart.domain),
                    });
                }
                None => columns.push(column.clone()),
            }
        }
        for column in other.columns.iter() {
            if !self.contains_name(&column.name) {
                columns.push(column.clone());
            }
        }
        Self::new(columns)
    }

    /// Spec for a column join. Column names must be disjoint.
    pub fn append(&self, other: &Self) -> Result<Self> {
        let mut columns: Vec<ColumnSpec> =
            Vec::with_capacity(self.columns.len() + other.columns.len());
        columns.extend(self.columns.iter().cloned());
        for column in other.columns.iter() {
            if self.contains_name(&column.name) {
                return Err(Error::DuplicateColumnName(column.name.clone()));
            }
            columns.push(column.clone());
        }
        Self::new(columns)
    }

    pub fn project(&self, indices: &[usize]) -> Result<Self> {
        let columns = indices
            .iter()
            .map(|&i| {
                self.columns
                    .get(i)
                    .cloned()
                    .ok_or(Error::ColumnCountMismatch {
                        expected: self.columns.len(),
                        actual: i + 1,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(columns)
    }

    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if row.cells.len() != self.columns.len() {
            return Err(Error::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: row.cells.len(),
            });
        }
        for (cell, column) in row.cells.iter().zip(self.columns.iter()) {
            if !cell.is_instance_of(column.dtype) {
                return Err(Error::TypeMismatch);
            }
        }
        Ok(())
    }
}
