//! Data models for the payroll batch engine.
//!
//! The `models` module defines the serialisable records the engine
//! aggregates, together with the scope and parameter types that are
//! threaded explicitly through every fetch, workflow and export call.
//! Records are immutable once fetched: a change of status is always
//! a round-trip to the payroll service followed by a fresh snapshot.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Tag holding the department a record belongs to.
pub const DEPARTMENT_TAG: &str = "department";

/// Unicode lowercase folding used by every case-insensitive comparison.
pub fn folded(text: &str) -> impl Iterator<Item = char> + '_ {
    text.chars().flat_map(char::to_lowercase)
}

/// Whether two names are equal once trimmed and case-folded.
pub fn same_name(a: &str, b: &str) -> bool {
    folded(a.trim()).eq(folded(b.trim()))
}

/// A financial or operational entity: a posted transaction, a payroll
/// line or a redundancy case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier assigned by the payroll service.
    pub id: String,
    /// The employee that owns this record.
    pub employee_id: String,
    /// Display name of the owning employee.
    #[serde(default)]
    pub employee_name: String,
    /// Period or date tag, e.g. `"2024-03"`.
    #[serde(default)]
    pub period: String,
    /// Monetary fields keyed by name (`gross`, `tax`, `deductions`,
    /// `net`, ...).
    #[serde(default)]
    pub amounts: BTreeMap<String, Decimal>,
    /// Categorical fields keyed by name (`bank`, `department`,
    /// `transaction_type`, ...).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A borrowed view of one field on a record or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Number(Decimal),
}

impl Record {
    /// Looks up a field by name. Identity fields come first, then tags,
    /// then amounts. Returns `None` when the record does not carry it.
    pub fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "id" => Some(FieldValue::Text(&self.id)),
            "employee_id" => Some(FieldValue::Text(&self.employee_id)),
            "employee_name" => Some(FieldValue::Text(&self.employee_name)),
            "period" => Some(FieldValue::Text(&self.period)),
            _ => self
                .tags
                .get(name)
                .map(|t| FieldValue::Text(t.as_str()))
                .or_else(|| self.amounts.get(name).map(|a| FieldValue::Number(*a))),
        }
    }

    /// Returns the named amount, if present.
    pub fn amount(&self, name: &str) -> Option<Decimal> {
        self.amounts.get(name).copied()
    }

    /// Returns the named tag, if present.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }
}

/// The period a workflow or fetch operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    /// A single pay period such as `"2024-03"`.
    Pay(String),
    /// A whole tax year.
    Year(u16),
}

impl Period {
    fn is_blank(&self) -> bool {
        match self {
            Period::Pay(tag) => tag.trim().is_empty(),
            Period::Year(year) => *year == 0,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Pay(tag) => f.write_str(tag.trim()),
            Period::Year(year) => write!(f, "{year}"),
        }
    }
}

/// Which employees an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Population {
    /// Every employee of the company, chosen explicitly.
    Entire,
    /// Only employees in the named departments.
    Departments(BTreeSet<String>),
}

impl Population {
    /// Whether a record falls inside this population. Department names
    /// match by [`same_name`]; a record with no department is only part
    /// of the entire population.
    pub fn includes(&self, record: &Record) -> bool {
        match self {
            Population::Entire => true,
            Population::Departments(names) => record
                .tag(DEPARTMENT_TAG)
                .map(|dept| names.iter().any(|n| same_name(n, dept)))
                .unwrap_or(false),
        }
    }

    /// Trims department names and drops blank ones.
    pub fn normalized(self) -> Self {
        match self {
            Population::Entire => Population::Entire,
            Population::Departments(names) => Population::Departments(
                names
                    .into_iter()
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect(),
            ),
        }
    }
}

/// The (company, period, population) triple identifying which records
/// an operation works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub company_id: String,
    pub period: Period,
    pub population: Population,
}

impl Scope {
    /// True when the company and period are both filled in.
    pub fn is_complete(&self) -> bool {
        !self.company_id.trim().is_empty() && !self.period.is_blank()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "company {} period {}", self.company_id, self.period)?;
        match &self.population {
            Population::Entire => f.write_str(" (entire population)"),
            Population::Departments(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, " (departments: {})", names.join(", "))
            }
        }
    }
}

/// The irreversible batch operations the workflow gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    PayrollRun,
    BankDisbursement,
    RedundancySettlement,
}

impl OperationKind {
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::PayrollRun => "payroll_run",
            OperationKind::BankDisbursement => "bank_disbursement",
            OperationKind::RedundancySettlement => "redundancy_settlement",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Operation-specific choices collected while configuring a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationParameters {
    /// Earning and deduction categories that apply to the run.
    #[serde(default)]
    pub categories: BTreeSet<String>,
    /// Settlement factors to include (notice pay, vacation, ...).
    #[serde(default)]
    pub settlement_factors: BTreeSet<String>,
}

/// An immutable in-memory snapshot of the records for one scope.
///
/// Cloning a store is cheap; the records are shared and never mutated.
/// A refresh replaces the whole store.
#[derive(Debug, Clone)]
pub struct RecordStore {
    scope: Scope,
    records: Arc<[Record]>,
}

impl RecordStore {
    pub fn new(scope: Scope, records: Vec<Record>) -> Self {
        Self {
            scope,
            records: records.into(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::banked;
    use super::*;

    #[test]
    fn field_lookup_prefers_identity_then_tags_then_amounts() {
        let record = banked("1", "BNS", 500);
        assert_eq!(record.field("id"), Some(FieldValue::Text("1")));
        assert_eq!(record.field("bank"), Some(FieldValue::Text("BNS")));
        assert_eq!(record.field("net"), Some(FieldValue::Number(Decimal::from(500))));
        assert_eq!(record.field("gross"), None);
    }

    #[test]
    fn department_population_matches_case_insensitively() {
        let mut record = banked("1", "BNS", 500);
        record.tags.insert(DEPARTMENT_TAG.into(), "Finance".into());
        let finance = Population::Departments(BTreeSet::from(["finance".to_string()]));
        let sales = Population::Departments(BTreeSet::from(["Sales".to_string()]));
        assert!(finance.includes(&record));
        assert!(!sales.includes(&record));
        assert!(!finance.includes(&banked("2", "NCB", 1)));
        assert!(Population::Entire.includes(&banked("2", "NCB", 1)));
    }

    #[test]
    fn department_names_ignore_padding_and_fold_unicode() {
        let mut record = banked("1", "BNS", 500);
        record.tags.insert(DEPARTMENT_TAG.into(), "Équipe ".into());
        let padded = Population::Departments(BTreeSet::from([" équipe".to_string()]));
        assert!(padded.includes(&record));
        assert_eq!(
            padded.normalized(),
            Population::Departments(BTreeSet::from(["équipe".to_string()]))
        );
        let blank = Population::Departments(BTreeSet::from(["  ".to_string()]));
        assert_eq!(blank.normalized(), Population::Departments(BTreeSet::new()));
        assert!(same_name("ÖKONOMIE", " ökonomie "));
    }

    #[test]
    fn scope_completeness() {
        let mut scope = super::fixtures::scope("ACME");
        assert!(scope.is_complete());
        scope.period = Period::Pay("  ".into());
        assert!(!scope.is_complete());
        scope.period = Period::Year(2024);
        scope.company_id = String::new();
        assert!(!scope.is_complete());
    }

    #[test]
    fn record_deserializes_decimal_strings() {
        let record: Record = serde_json::from_str(
            r#"{"id":"7","employee_id":"E7","amounts":{"net":"1250.50"},"tags":{"bank":"NCB"}}"#,
        )
        .unwrap();
        assert_eq!(record.amount("net"), Some(Decimal::new(125050, 2)));
        assert_eq!(record.tag("bank"), Some("NCB"));
        assert!(record.employee_name.is_empty());
    }
}
