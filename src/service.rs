//! The payroll service collaborator.
//!
//! The engine never computes statutory amounts and never persists
//! anything itself. It fetches record snapshots and sends commit
//! commands through [`PayrollService`], and asks a
//! [`SettlementCalculator`] for per-subject settlement amounts.
//!
//! [`SnapshotService`] is an implementation backed by JSON snapshot
//! files, used by the HTTP binary and in tests.

use crate::error::ServiceError;
use crate::models::{same_name, OperationKind, OperationParameters, Period, Record, Scope};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Tag used by [`SnapshotService`] to match earning/deduction categories.
pub const CATEGORY_TAG: &str = "category";

/// Arguments of a record fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub scope: Scope,
    #[serde(default)]
    pub parameters: OperationParameters,
}

/// Arguments of a commit. Carries identifying parameters only; the
/// service recomputes every amount itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub operation: OperationKind,
    pub scope: Scope,
    pub parameters: OperationParameters,
}

/// What the service answered to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub success: bool,
    pub message: String,
    pub artifact_id: Option<String>,
}

/// Remote payroll API as seen by the engine.
///
/// `fetch` must be idempotent and free of side effects. `commit` must be
/// safe to retry after a failure; idempotency per scope and operation is
/// the service's job.
#[async_trait]
pub trait PayrollService: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, ServiceError>;

    async fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, ServiceError>;
}

/// Computes settlement amounts for one subject (an employee or a
/// redundancy case). Opaque to the engine; only the returned amounts are
/// used, for display and confirmation.
///
/// Calculators must be thread-safe (`Send + Sync`) because previews call
/// them concurrently across threads.
pub trait SettlementCalculator: Send + Sync {
    fn calculate(
        &self,
        subject_id: &str,
        parameters: &OperationParameters,
    ) -> Result<BTreeMap<String, Decimal>, ServiceError>;
}

/// The records of one company for one period, as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub company_id: String,
    pub period: Period,
    pub records: Vec<Record>,
}

/// Load all snapshots from a directory.
///
/// Every `.json` file is parsed as a [`Snapshot`]. Files that fail to
/// parse are skipped with a warning. A missing directory yields no
/// snapshots.
pub fn load_snapshots_from_dir(path: &Path) -> Result<Vec<Snapshot>> {
    let mut snapshots = Vec::new();
    if !path.is_dir() {
        warn!(dir = %path.display(), "snapshot directory not found");
        return Ok(snapshots);
    }
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let file = entry.path();
        if !entry.file_type()?.is_file() || file.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        let data = std::fs::read_to_string(&file)?;
        match serde_json::from_str::<Snapshot>(&data) {
            Ok(snapshot) => {
                debug!(file = %file.display(), records = snapshot.records.len(), "loaded snapshot");
                snapshots.push(snapshot);
            }
            Err(err) => warn!(file = %file.display(), error = %err, "failed to parse snapshot"),
        }
    }
    info!(count = snapshots.len(), dir = %path.display(), "snapshots loaded");
    Ok(snapshots)
}

type SnapshotKey = (String, Period);
type CommitKey = (OperationKind, String, Period);

/// A [`PayrollService`] and [`SettlementCalculator`] over in-memory
/// snapshots.
///
/// Fetch narrows a snapshot by population and, when categories are
/// given, by the `category` tag (records without one are kept). Commits
/// are idempotent per (operation, company, period): a repeat returns the
/// first receipt.
#[derive(Debug, Default)]
pub struct SnapshotService {
    snapshots: HashMap<SnapshotKey, Vec<Record>>,
    receipts: Mutex<HashMap<CommitKey, CommitReceipt>>,
}

impl SnapshotService {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        let mut by_key: HashMap<SnapshotKey, Vec<Record>> = HashMap::new();
        for snapshot in snapshots {
            by_key
                .entry((snapshot.company_id, snapshot.period))
                .or_default()
                .extend(snapshot.records);
        }
        Self {
            snapshots: by_key,
            receipts: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_dir(path: &Path) -> Result<Self> {
        Ok(Self::new(load_snapshots_from_dir(path)?))
    }

    fn records_for(&self, scope: &Scope) -> Option<&Vec<Record>> {
        self.snapshots
            .get(&(scope.company_id.clone(), scope.period.clone()))
    }

    /// Receipts issued so far.
    pub fn receipts(&self) -> Vec<CommitReceipt> {
        match self.receipts.lock() {
            Ok(receipts) => receipts.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }
}

fn category_applies(record: &Record, parameters: &OperationParameters) -> bool {
    if parameters.categories.is_empty() {
        return true;
    }
    match record.tag(CATEGORY_TAG) {
        Some(category) => parameters
            .categories
            .iter()
            .any(|c| same_name(c, category)),
        None => true,
    }
}

#[async_trait]
impl PayrollService for SnapshotService {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, ServiceError> {
        let Some(records) = self.records_for(&request.scope) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|r| request.scope.population.includes(r))
            .filter(|r| category_applies(r, &request.parameters))
            .cloned()
            .collect())
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, ServiceError> {
        if self.records_for(&request.scope).is_none() {
            return Err(ServiceError::Rejected(format!(
                "no snapshot for {}",
                request.scope
            )));
        }
        let key = (
            request.operation,
            request.scope.company_id.clone(),
            request.scope.period.clone(),
        );
        let mut receipts = self
            .receipts
            .lock()
            .map_err(|_| ServiceError::Unavailable("receipt ledger poisoned".into()))?;
        let receipt = receipts.entry(key).or_insert_with(|| CommitReceipt {
            success: true,
            message: format!("{} accepted for {}", request.operation, request.scope),
            artifact_id: Some(format!(
                "{}-{}-{}",
                request.operation, request.scope.company_id, request.scope.period
            )),
        });
        Ok(receipt.clone())
    }
}

/// Looks the subject up as a record id across all snapshots and returns
/// its amounts, narrowed to the selected settlement factors when any are
/// given.
impl SettlementCalculator for SnapshotService {
    fn calculate(
        &self,
        subject_id: &str,
        parameters: &OperationParameters,
    ) -> Result<BTreeMap<String, Decimal>, ServiceError> {
        let record = self
            .snapshots
            .values()
            .flatten()
            .find(|r| r.id == subject_id)
            .ok_or_else(|| ServiceError::UnknownSubject(subject_id.to_string()))?;
        let factors = &parameters.settlement_factors;
        Ok(record
            .amounts
            .iter()
            .filter(|(field, _)| factors.is_empty() || factors.contains(*field))
            .map(|(field, amount)| (field.clone(), *amount))
            .collect())
    }
}
