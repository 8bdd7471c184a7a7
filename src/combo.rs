// 🧩 Combo - one logical cell, several discrete values
//
// A field is either null (`None`), a scalar, or a Combo of >= 2 distinct values.
// `Cell` is the tagged union that enforces that shape everywhere a record field
// may legitimately carry more than one value (originator countries, ISINs,
// issuer jurisdictions when ISINs disagree, ...).

use crate::error::ComboError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// COMBO
// ============================================================================

/// Set of at least two distinct values.
///
/// Members are kept in a `BTreeSet`, so iteration order is stable (sorted) and
/// equality, hashing and ordering all follow membership rather than insertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Combo {
    values: BTreeSet<String>,
}

impl Combo {
    /// Build a Combo; fails when fewer than 2 distinct values are given
    pub fn new<I, S>(values: I) -> Result<Self, ComboError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        if values.len() < 2 {
            return Err(ComboError::TooFewMembers {
                distinct: values.len(),
            });
        }
        Ok(Combo { values })
    }

    /// Add a member. Returns false if it was already present.
    pub fn add(&mut self, value: impl Into<String>) -> bool {
        self.values.insert(value.into())
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.contains(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false; kept for API symmetry with collections
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.values.iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for Combo {
    type Error = ComboError;

    fn try_from(values: Vec<String>) -> Result<Self, Self::Error> {
        Combo::new(values)
    }
}

impl From<Combo> for Vec<String> {
    fn from(combo: Combo) -> Self {
        combo.values.into_iter().collect()
    }
}

impl IntoIterator for Combo {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl fmt::Display for Combo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(" / "))
    }
}

// ============================================================================
// CELL
// ============================================================================

/// A non-null field value: one scalar, or a Combo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Scalar(String),
    Multi(Combo),
}

impl Cell {
    pub fn scalar(value: impl Into<String>) -> Self {
        Cell::Scalar(value.into())
    }

    /// Merge policy used across reconciliation:
    /// no values → null, all agree → scalar, disagreement → Combo.
    pub fn from_values<I, S>(values: I) -> Option<Cell>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut distinct: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        match distinct.len() {
            0 => None,
            1 => distinct.pop_first().map(Cell::Scalar),
            _ => Some(Cell::Multi(Combo { values: distinct })),
        }
    }

    /// Merge several cells into one, flattening any Combos
    pub fn merge<I>(cells: I) -> Option<Cell>
    where
        I: IntoIterator<Item = Cell>,
    {
        Cell::from_values(cells.into_iter().flat_map(|c| c.into_values()))
    }

    /// Add a value, promoting a scalar to a Combo when the value differs
    pub fn add(&mut self, value: impl Into<String>) {
        let value = value.into();
        match self {
            Cell::Scalar(existing) if *existing == value => {}
            Cell::Scalar(existing) => {
                let mut values = BTreeSet::new();
                values.insert(std::mem::take(existing));
                values.insert(value);
                *self = Cell::Multi(Combo { values });
            }
            Cell::Multi(combo) => {
                combo.add(value);
            }
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Cell::Multi(_))
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Cell::Scalar(v) => Some(v),
            Cell::Multi(_) => None,
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        match self {
            Cell::Scalar(v) => v == value,
            Cell::Multi(combo) => combo.contains(value),
        }
    }

    /// Number of discrete values (1 for a scalar)
    pub fn cardinality(&self) -> usize {
        match self {
            Cell::Scalar(_) => 1,
            Cell::Multi(combo) => combo.len(),
        }
    }

    /// Iterate members; a scalar yields itself once
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        let (single, many) = match self {
            Cell::Scalar(v) => (Some(v.as_str()), None),
            Cell::Multi(combo) => (None, Some(combo.iter())),
        };
        single.into_iter().chain(many.into_iter().flatten())
    }

    pub fn into_values(self) -> Vec<String> {
        match self {
            Cell::Scalar(v) => vec![v],
            Cell::Multi(combo) => combo.into_iter().collect(),
        }
    }
}

/// Comparing against a scalar is a membership test
impl PartialEq<str> for Cell {
    fn eq(&self, other: &str) -> bool {
        self.contains(other)
    }
}

impl PartialEq<&str> for Cell {
    fn eq(&self, other: &&str) -> bool {
        self.contains(other)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Scalar(v) => write!(f, "{}", v),
            Cell::Multi(combo) => write!(f, "{}", combo),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
