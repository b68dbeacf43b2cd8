//! The shared aggregation pipeline.
//!
//! Every report and batch screen runs the same steps over a fetched
//! snapshot: filter with a [`Predicate`], order the surviving records,
//! partition them into groups and order the groups. Only the predicate,
//! the key function and the sort levels differ per screen, so they are
//! carried as data in a [`Pipeline`].
//!
//! Everything here is synchronous and pure; it runs after the fetch has
//! completed. [`settlement_preview`] uses `rayon` to fan a
//! [`SettlementCalculator`] out across subjects.

use crate::error::{EngineError, ServiceError};
use crate::filter::{filter, Predicate};
use crate::group::{group_by, summarize, Group, GroupKey, Summary};
use crate::models::{OperationKind, OperationParameters, Record};
use crate::service::SettlementCalculator;
use crate::sort::{sort_in_place, SortLevel, SortSpec};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Screen-specific parameters of the shared pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub predicate: Predicate,
    /// When absent, no groups are produced.
    #[serde(default)]
    pub group_by: Option<GroupKey>,
    #[serde(default)]
    pub record_order: SortSpec,
    #[serde(default)]
    pub group_order: SortSpec,
}

/// Output of one pipeline run. `summary` always covers exactly `records`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub records: Vec<Record>,
    pub groups: Vec<Group>,
    pub summary: Summary,
}

impl Aggregate {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Pipeline {
    /// The pipeline each gated operation confirms against.
    pub fn for_operation(kind: OperationKind) -> Self {
        let (group, record_order) = match kind {
            OperationKind::PayrollRun => ("department", SortLevel::asc("employee_name")),
            OperationKind::BankDisbursement => ("bank", SortLevel::asc("employee_name")),
            OperationKind::RedundancySettlement => ("department", SortLevel::desc("net")),
        };
        Self {
            predicate: Predicate::all(),
            group_by: Some(GroupKey::by(group)),
            record_order: SortSpec::by(record_order),
            group_order: SortSpec::by(SortLevel::asc("key")),
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Runs filter, sort and group over `view`. The input is not touched,
    /// and running twice on the same input gives the same aggregate.
    pub fn run(&self, view: &[Record]) -> Result<Aggregate, EngineError> {
        let mut records = filter(view, &self.predicate);
        sort_in_place(&mut records, &self.record_order);
        let mut groups = match &self.group_by {
            Some(key) => group_by(&records, key)?,
            None => Vec::new(),
        };
        sort_in_place(&mut groups, &self.group_order);
        let summary = summarize(&records)?;
        Ok(Aggregate {
            records,
            groups,
            summary,
        })
    }
}

/// Asks `calculator` for every subject in parallel and turns the answers
/// into records tagged with `period`, in subject order.
pub fn settlement_preview(
    calculator: &dyn SettlementCalculator,
    subjects: &[String],
    parameters: &OperationParameters,
    period: &str,
) -> Result<Vec<Record>, ServiceError> {
    subjects
        .par_iter()
        .map(|subject| {
            let amounts = calculator.calculate(subject, parameters)?;
            Ok(Record {
                id: subject.clone(),
                employee_id: subject.clone(),
                employee_name: String::new(),
                period: period.to_string(),
                amounts,
                tags: Default::default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Condition;
    use crate::models::fixtures::banked;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn sample() -> Vec<Record> {
        vec![
            banked("1", "BNS", 500_000),
            banked("2", "NCB", 300_000),
            banked("3", "BNS", 100_000),
        ]
    }

    #[test]
    fn disbursement_pipeline_groups_by_bank() {
        let pipeline = Pipeline {
            group_order: SortSpec::by(SortLevel::desc("net")),
            ..Pipeline::for_operation(OperationKind::BankDisbursement)
        };
        let aggregate = pipeline.run(&sample()).unwrap();
        let keys: Vec<_> = aggregate.groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, ["BNS", "NCB"]);
        assert_eq!(aggregate.summary.count, 3);
        assert_eq!(aggregate.summary.total("net"), Decimal::from(900_000));
    }

    #[test]
    fn summary_covers_only_filtered_records() {
        let pipeline = Pipeline::for_operation(OperationKind::BankDisbursement)
            .with_predicate(Predicate::all().and(Condition::greater_than("net", 400_000.into())));
        let aggregate = pipeline.run(&sample()).unwrap();
        assert_eq!(aggregate.records.len(), 1);
        assert_eq!(aggregate.groups.len(), 1);
        assert_eq!(aggregate.summary.total("net"), Decimal::from(500_000));
    }

    #[test]
    fn run_is_deterministic_and_leaves_input_alone() {
        let view = sample();
        let pipeline = Pipeline {
            record_order: SortSpec::by(SortLevel::desc("net")),
            ..Pipeline::default()
        };
        let first = pipeline.run(&view).unwrap();
        let second = pipeline.run(&view).unwrap();
        assert_eq!(first, second);
        assert!(first.groups.is_empty());
        assert_eq!(view, sample());
        assert_eq!(first.records[2].id, "3");
    }

    struct Flat;

    impl SettlementCalculator for Flat {
        fn calculate(
            &self,
            subject_id: &str,
            _parameters: &OperationParameters,
        ) -> Result<BTreeMap<String, Decimal>, ServiceError> {
            if subject_id == "bad" {
                return Err(ServiceError::UnknownSubject(subject_id.into()));
            }
            Ok(BTreeMap::from([("net".to_string(), Decimal::new(12_345, 2))]))
        }
    }

    #[test]
    fn settlement_preview_keeps_subject_order() {
        let subjects: Vec<String> = (0..50).map(|i| format!("S{i}")).collect();
        let records =
            settlement_preview(&Flat, &subjects, &OperationParameters::default(), "2024").unwrap();
        assert_eq!(records.len(), 50);
        assert!(records.iter().zip(&subjects).all(|(r, s)| &r.id == s));
        let summary = summarize(&records).unwrap();
        assert_eq!(summary.total("net"), Decimal::new(617_250, 2));
    }

    #[test]
    fn settlement_preview_surfaces_calculator_errors() {
        let subjects = vec!["ok".to_string(), "bad".to_string()];
        let err = settlement_preview(&Flat, &subjects, &OperationParameters::default(), "2024")
            .unwrap_err();
        assert_eq!(err, ServiceError::UnknownSubject("bad".into()));
    }
}
