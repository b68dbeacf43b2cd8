//! Stable multi-key ordering of records and groups.

use crate::error::EngineError;
use crate::group::Group;
use crate::models::{folded, FieldValue, Record};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Maximum number of levels in a [`SortSpec`].
pub const MAX_SORT_LEVELS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortLevel {
    pub key: String,
    #[serde(default)]
    pub direction: Direction,
}

impl SortLevel {
    pub fn asc(key: &str) -> Self {
        Self {
            key: key.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(key: &str) -> Self {
        Self {
            key: key.into(),
            direction: Direction::Descending,
        }
    }
}

/// Up to [`MAX_SORT_LEVELS`] levels, compared in order. A `None` level
/// is skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Option<SortLevel>>", into = "Vec<Option<SortLevel>>")]
pub struct SortSpec {
    levels: Vec<Option<SortLevel>>,
}

impl SortSpec {
    pub fn new<I>(levels: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = Option<SortLevel>>,
    {
        let levels: Vec<_> = levels.into_iter().collect();
        if levels.len() > MAX_SORT_LEVELS {
            return Err(EngineError::TooManySortLevels {
                max: MAX_SORT_LEVELS,
                got: levels.len(),
            });
        }
        Ok(Self { levels })
    }

    /// A single-level spec.
    pub fn by(level: SortLevel) -> Self {
        Self {
            levels: vec![Some(level)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Option::is_none)
    }

    fn active(&self) -> impl Iterator<Item = &SortLevel> {
        self.levels.iter().flatten()
    }

    /// Compares two items level by level; `Equal` means a full tie.
    pub fn compare<T: Sortable>(&self, a: &T, b: &T) -> Ordering {
        self.active()
            .map(|level| {
                compare_values(
                    a.sort_value(&level.key),
                    b.sort_value(&level.key),
                    level.direction,
                )
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl TryFrom<Vec<Option<SortLevel>>> for SortSpec {
    type Error = EngineError;

    fn try_from(levels: Vec<Option<SortLevel>>) -> Result<Self, Self::Error> {
        SortSpec::new(levels)
    }
}

impl From<SortSpec> for Vec<Option<SortLevel>> {
    fn from(spec: SortSpec) -> Self {
        spec.levels
    }
}

/// Anything the sorter (and the exporter) can read named values from.
pub trait Sortable {
    fn sort_value(&self, key: &str) -> Option<FieldValue<'_>>;
}

impl Sortable for Record {
    fn sort_value(&self, key: &str) -> Option<FieldValue<'_>> {
        self.field(key)
    }
}

/// Groups expose `key`, `count`, and each summed amount field.
impl Sortable for Group {
    fn sort_value(&self, key: &str) -> Option<FieldValue<'_>> {
        match key {
            "key" => Some(FieldValue::Text(&self.key)),
            "count" => Some(FieldValue::Number(Decimal::from(self.summary.count))),
            _ => self.summary.totals.get(key).map(|t| FieldValue::Number(*t)),
        }
    }
}

// Missing values go last whichever way the level points.
fn compare_values(a: Option<FieldValue<'_>>, b: Option<FieldValue<'_>>, dir: Direction) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = natural_order(a, b);
            match dir {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            }
        }
    }
}

fn natural_order(a: FieldValue<'_>, b: FieldValue<'_>) -> Ordering {
    match (a, b) {
        (FieldValue::Number(a), FieldValue::Number(b)) => a.cmp(&b),
        (FieldValue::Text(a), FieldValue::Text(b)) => folded(a).cmp(folded(b)),
        (FieldValue::Number(_), FieldValue::Text(_)) => Ordering::Less,
        (FieldValue::Text(_), FieldValue::Number(_)) => Ordering::Greater,
    }
}

/// Sorts in place. Stable: full ties keep their relative order.
pub fn sort_in_place<T: Sortable>(items: &mut [T], spec: &SortSpec) {
    if spec.is_empty() {
        return;
    }
    items.sort_by(|a, b| spec.compare(a, b));
}

/// Returns a sorted copy of `items`, leaving the input untouched.
pub fn sort_view<T: Sortable + Clone>(items: &[T], spec: &SortSpec) -> Vec<T> {
    let mut sorted = items.to_vec();
    sort_in_place(&mut sorted, spec);
    sorted
}
