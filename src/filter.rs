//! Predicate filtering over record views.
//!
//! A [`Predicate`] is a conjunction of field-level [`Condition`]s. A
//! record passes when every condition holds; a condition that names a
//! field the record does not carry (or carries with the wrong kind)
//! simply fails, it never errors.

use crate::models::{folded, same_name, FieldValue, Record};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// One field-level test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Case-insensitive substring match on a text field.
    Contains { field: String, needle: String },
    /// Exact match on a numeric field.
    Equals { field: String, value: Decimal },
    /// Numeric range; either end may be open.
    Range {
        field: String,
        lower: Bound<Decimal>,
        upper: Bound<Decimal>,
    },
    /// Case-insensitive set membership on a categorical field.
    OneOf { field: String, values: Vec<String> },
}

impl Condition {
    pub fn contains(field: &str, needle: &str) -> Self {
        Condition::Contains {
            field: field.into(),
            needle: needle.into(),
        }
    }

    pub fn equals(field: &str, value: Decimal) -> Self {
        Condition::Equals {
            field: field.into(),
            value,
        }
    }

    pub fn greater_than(field: &str, value: Decimal) -> Self {
        Condition::Range {
            field: field.into(),
            lower: Bound::Excluded(value),
            upper: Bound::Unbounded,
        }
    }

    pub fn between(field: &str, min: Decimal, max: Decimal) -> Self {
        Condition::Range {
            field: field.into(),
            lower: Bound::Included(min),
            upper: Bound::Included(max),
        }
    }

    pub fn one_of<I, S>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Condition::OneOf {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Condition::Contains { field, needle } => match record.field(field) {
                Some(FieldValue::Text(text)) => {
                    let text: String = folded(text).collect();
                    let needle: String = folded(needle).collect();
                    text.contains(&needle)
                }
                _ => false,
            },
            Condition::Equals { field, value } => match record.field(field) {
                Some(FieldValue::Number(n)) => n == *value,
                _ => false,
            },
            Condition::Range {
                field,
                lower,
                upper,
            } => match record.field(field) {
                Some(FieldValue::Number(n)) => {
                    let above = match lower {
                        Bound::Included(min) => n >= *min,
                        Bound::Excluded(min) => n > *min,
                        Bound::Unbounded => true,
                    };
                    let below = match upper {
                        Bound::Included(max) => n <= *max,
                        Bound::Excluded(max) => n < *max,
                        Bound::Unbounded => true,
                    };
                    above && below
                }
                _ => false,
            },
            Condition::OneOf { field, values } => match record.field(field) {
                Some(FieldValue::Text(text)) => values.iter().any(|v| same_name(v, text)),
                _ => false,
            },
        }
    }
}

/// A conjunction of conditions. The empty predicate accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

impl From<Vec<Condition>> for Predicate {
    fn from(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }
}

/// Returns the records satisfying `predicate`, in their original order.
pub fn filter(view: &[Record], predicate: &Predicate) -> Vec<Record> {
    if predicate.is_empty() {
        return view.to_vec();
    }
    view.iter()
        .filter(|record| predicate.matches(record))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::banked;

    fn sample() -> Vec<Record> {
        vec![
            banked("1", "BNS", 500_000),
            banked("2", "NCB", 300_000),
            banked("3", "BNS", 100_000),
        ]
    }

    #[test]
    fn empty_predicate_is_identity() {
        let view = sample();
        assert_eq!(filter(&view, &Predicate::all()), view);
    }

    #[test]
    fn range_filter_preserves_order() {
        let view = sample();
        let predicate =
            Predicate::all().and(Condition::between("net", 100_000.into(), 300_000.into()));
        let ids: Vec<_> = filter(&view, &predicate).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["2", "3"]);
    }

    #[test]
    fn text_conditions_ignore_case() {
        let view = sample();
        let by_name = Predicate::all().and(Condition::contains("employee_name", "EMPLOYEE 2"));
        assert_eq!(filter(&view, &by_name).len(), 1);

        let by_bank = Predicate::all().and(Condition::one_of("bank", ["bns"]));
        assert_eq!(filter(&view, &by_bank).len(), 2);
    }

    #[test]
    fn conditions_are_conjoined() {
        let view = sample();
        let predicate = Predicate::all()
            .and(Condition::one_of("bank", ["BNS"]))
            .and(Condition::greater_than("net", 400_000.into()));
        let ids: Vec<_> = filter(&view, &predicate).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["1"]);
    }

    #[test]
    fn missing_or_mistyped_fields_never_match() {
        let view = sample();
        for condition in [
            Condition::contains("department", "x"),
            Condition::equals("gross", 1.into()),
            Condition::greater_than("bank", 0.into()),
            Condition::contains("net", "5"),
            Condition::one_of("transaction_type", ["loan"]),
        ] {
            assert!(filter(&view, &Predicate::all().and(condition)).is_empty());
        }
    }

    #[test]
    fn predicate_deserializes_from_json() {
        let predicate: Predicate = serde_json::from_str(
            r#"[{"op":"one_of","field":"bank","values":["NCB"]},
                {"op":"equals","field":"net","value":"300000"}]"#,
        )
        .unwrap();
        assert_eq!(predicate.conditions().len(), 2);
        let ids: Vec<_> = filter(&sample(), &predicate).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["2"]);
    }
}
