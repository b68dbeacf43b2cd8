//! Grouping and reduction of record views into monetary summaries.
//!
//! Totals are `Decimal` sums, so reducing the same records in any order
//! or any partitioning produces exactly the same figures. The whole-view
//! [`summarize`] uses `rayon` to reduce in parallel, which relies on that
//! property.

use crate::error::EngineError;
use crate::models::{FieldValue, Record};
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Key used for records whose grouping field is absent or blank.
pub const DEFAULT_GROUP_KEY: &str = "General";

/// Count and per-field totals over a set of records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub totals: BTreeMap<String, Decimal>,
}

impl Summary {
    pub fn of_record(record: &Record) -> Self {
        Self {
            count: 1,
            totals: record.amounts.clone(),
        }
    }

    /// Folds one more record into the summary.
    pub fn add_record(&mut self, record: &Record) -> Result<(), EngineError> {
        for (field, amount) in &record.amounts {
            add_into(&mut self.totals, field, *amount)?;
        }
        self.count += 1;
        Ok(())
    }

    /// Combines two summaries. Associative and commutative.
    pub fn merge(mut self, other: Summary) -> Result<Summary, EngineError> {
        for (field, amount) in other.totals {
            add_into(&mut self.totals, &field, amount)?;
        }
        self.count += other.count;
        Ok(self)
    }

    /// Total for `field`, zero when no member carried it.
    pub fn total(&self, field: &str) -> Decimal {
        self.totals.get(field).copied().unwrap_or(Decimal::ZERO)
    }
}

fn add_into(
    totals: &mut BTreeMap<String, Decimal>,
    field: &str,
    amount: Decimal,
) -> Result<(), EngineError> {
    let slot = totals.entry(field.to_string()).or_insert(Decimal::ZERO);
    *slot = slot.checked_add(amount).ok_or_else(|| EngineError::Overflow {
        field: field.to_string(),
    })?;
    Ok(())
}

/// Reduces a whole view into one summary.
pub fn summarize(view: &[Record]) -> Result<Summary, EngineError> {
    view.par_iter()
        .map(|record| Ok(Summary::of_record(record)))
        .try_reduce(Summary::default, Summary::merge)
}

/// One partition of a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub key: String,
    pub members: Vec<Record>,
    pub summary: Summary,
}

/// Extracts a group key from a named field, falling back to a default
/// when the field is missing or blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKey {
    pub field: String,
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

fn default_fallback() -> String {
    DEFAULT_GROUP_KEY.to_string()
}

impl GroupKey {
    pub fn by(field: &str) -> Self {
        Self {
            field: field.into(),
            fallback: default_fallback(),
        }
    }

    pub fn extract(&self, record: &Record) -> String {
        let key = match record.field(&self.field) {
            Some(FieldValue::Text(text)) => text.trim().to_string(),
            Some(FieldValue::Number(n)) => n.normalize().to_string(),
            None => String::new(),
        };
        if key.is_empty() {
            self.fallback.clone()
        } else {
            key
        }
    }
}

/// Partitions `view` by a named field.
pub fn group_by(view: &[Record], key: &GroupKey) -> Result<Vec<Group>, EngineError> {
    group_by_with(view, |record| key.extract(record))
}

/// Partitions `view` by an arbitrary key function. Groups come out in
/// the order their key first appears; no empty group is produced.
pub fn group_by_with<F>(view: &[Record], key_fn: F) -> Result<Vec<Group>, EngineError>
where
    F: Fn(&Record) -> String,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();
    for record in view {
        let key = key_fn(record);
        let slot = match index.get(&key) {
            Some(slot) => *slot,
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(Group {
                    key,
                    members: Vec::new(),
                    summary: Summary::default(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[slot];
        group.summary.add_record(record)?;
        group.members.push(record.clone());
    }
    Ok(groups)
}
