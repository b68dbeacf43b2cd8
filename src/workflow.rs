//! Gated multi-stage workflow for irreversible batch operations.
//!
//! A [`WorkflowSession`] walks one operation (a payroll run, a bank
//! disbursement, a redundancy settlement) through
//!
//! ```text
//! Selecting -> Configuring -> Validating -> ReadyToCommit -> Committing -> Committed
//!                                  \                            \
//!                                   +-> Failed <-----------------+
//! ```
//!
//! with `Cancelled` reachable from every stage except `Committing`. The
//! only way into `Committing` is [`WorkflowSession::confirm`], called
//! while the validated summary is on display.
//!
//! Actions take `&self`, so a session can be shared by the handlers of
//! one screen. The state lock is never held across a remote call; the
//! stage itself is what keeps a second validation or commit from
//! starting while one is outstanding.

use crate::engine::{Aggregate, Pipeline};
use crate::error::{FailureReason, WorkflowError};
use crate::models::{
    same_name, OperationKind, OperationParameters, Population, RecordStore, Scope,
};
use crate::service::{CommitReceipt, CommitRequest, FetchRequest, PayrollService};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Selecting,
    Configuring,
    Validating,
    ReadyToCommit,
    Committing,
    Committed,
    Failed(FailureReason),
    Cancelled,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Selecting => "selecting",
            Stage::Configuring => "configuring",
            Stage::Validating => "validating",
            Stage::ReadyToCommit => "ready_to_commit",
            Stage::Committing => "committing",
            Stage::Committed => "committed",
            Stage::Failed(_) => "failed",
            Stage::Cancelled => "cancelled",
        }
    }

    /// `Committed` and `Cancelled` end a session for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Committed | Stage::Cancelled)
    }
}

#[derive(Debug)]
struct State {
    stage: Stage,
    scope: Option<Scope>,
    parameters: OperationParameters,
    aggregate: Option<Aggregate>,
    receipt: Option<CommitReceipt>,
    // Bumped on every validation so a late answer to an abandoned one
    // can be recognised.
    attempt: u64,
}

/// One single-use run of a gated operation.
pub struct WorkflowSession<S: ?Sized> {
    operation: OperationKind,
    pipeline: Pipeline,
    known_departments: BTreeSet<String>,
    service: Arc<S>,
    state: Mutex<State>,
}

impl<S> WorkflowSession<S>
where
    S: PayrollService + ?Sized,
{
    pub fn new(operation: OperationKind, service: Arc<S>) -> Self {
        Self {
            operation,
            pipeline: Pipeline::for_operation(operation),
            known_departments: BTreeSet::new(),
            service,
            state: Mutex::new(State {
                stage: Stage::Selecting,
                scope: None,
                parameters: OperationParameters::default(),
                aggregate: None,
                receipt: None,
                attempt: 0,
            }),
        }
    }

    /// Replaces the pipeline used to summarise the fetched population.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Departments a scope may name.
    pub fn with_known_departments<I, D>(mut self, departments: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        self.known_departments = departments.into_iter().map(Into::into).collect();
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stage(&self) -> Stage {
        self.state().stage.clone()
    }

    pub fn scope(&self) -> Option<Scope> {
        self.state().scope.clone()
    }

    pub fn parameters(&self) -> OperationParameters {
        self.state().parameters.clone()
    }

    /// The validated aggregate awaiting confirmation.
    pub fn summary(&self) -> Option<Aggregate> {
        self.state().aggregate.clone()
    }

    pub fn receipt(&self) -> Option<CommitReceipt> {
        self.state().receipt.clone()
    }

    fn refuse(&self, action: &'static str, stage: &Stage) -> WorkflowError {
        if stage.is_terminal() {
            WorkflowError::SessionFinished { stage: stage.name() }
        } else {
            WorkflowError::InvalidTransition {
                action,
                stage: stage.name(),
            }
        }
    }

    fn enter(&self, state: &mut State, stage: Stage) -> Stage {
        info!(
            operation = %self.operation,
            from = state.stage.name(),
            to = stage.name(),
            "workflow transition"
        );
        state.stage = stage;
        state.stage.clone()
    }

    fn check_scope(&self, scope: &Scope) -> Result<(), WorkflowError> {
        if !scope.is_complete() {
            return Err(WorkflowError::ScopeInvalid {
                reason: "company and period are required".into(),
            });
        }
        if let Population::Departments(names) = &scope.population {
            if names.is_empty() {
                return Err(WorkflowError::ScopeInvalid {
                    reason: "name at least one department or choose the entire population".into(),
                });
            }
            let unknown: Vec<&str> = names
                .iter()
                .filter(|n| !self.known_departments.iter().any(|k| same_name(k, n)))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                return Err(WorkflowError::ScopeInvalid {
                    reason: format!("unknown departments: {}", unknown.join(", ")),
                });
            }
        }
        Ok(())
    }

    /// Sets the scope and moves on to `Configuring`. Department names are
    /// stored trimmed. An invalid scope leaves the session in `Selecting`.
    pub fn select(&self, scope: Scope) -> Result<Stage, WorkflowError> {
        let mut state = self.state();
        if state.stage != Stage::Selecting {
            return Err(self.refuse("select a scope", &state.stage));
        }
        let scope = Scope {
            population: scope.population.normalized(),
            ..scope
        };
        self.check_scope(&scope)?;
        state.scope = Some(scope);
        Ok(self.enter(&mut state, Stage::Configuring))
    }

    /// Goes back to `Selecting`, keeping the configured parameters.
    pub fn revise_scope(&self) -> Result<Stage, WorkflowError> {
        let mut state = self.state();
        if !matches!(state.stage, Stage::Configuring | Stage::Failed(_)) {
            return Err(self.refuse("revise the scope", &state.stage));
        }
        state.aggregate = None;
        Ok(self.enter(&mut state, Stage::Selecting))
    }

    /// Records operation parameters. Purely local; may be called again
    /// to change them.
    pub fn configure(&self, parameters: OperationParameters) -> Result<Stage, WorkflowError> {
        let mut state = self.state();
        if state.stage != Stage::Configuring {
            return Err(self.refuse("configure", &state.stage));
        }
        state.parameters = parameters;
        Ok(state.stage.clone())
    }

    /// Fetches the population for the scope and summarises it. Ends in
    /// `ReadyToCommit` or `Failed`.
    pub async fn validate(&self) -> Result<Stage, WorkflowError> {
        let request = {
            let mut state = self.state();
            if state.stage != Stage::Configuring {
                return Err(self.refuse("validate", &state.stage));
            }
            self.begin_validation(&mut state)?
        };
        self.run_validation(request).await
    }

    /// Retries after a remote fault with the same scope and parameters.
    ///
    /// After `ValidationUnavailable` the fetch is issued again. After
    /// `CommitRejected` the session returns to `ReadyToCommit` with its
    /// summary and waits for a fresh confirmation.
    pub async fn retry(&self) -> Result<Stage, WorkflowError> {
        let request = {
            let mut state = self.state();
            match state.stage.clone() {
                Stage::Failed(FailureReason::ValidationUnavailable { .. }) => {
                    self.begin_validation(&mut state)?
                }
                Stage::Failed(FailureReason::CommitRejected { .. }) => {
                    return Ok(self.enter(&mut state, Stage::ReadyToCommit));
                }
                other => return Err(self.refuse("retry", &other)),
            }
        };
        self.run_validation(request).await
    }

    fn begin_validation(&self, state: &mut State) -> Result<(u64, FetchRequest), WorkflowError> {
        let scope = state.scope.clone().ok_or(WorkflowError::ScopeInvalid {
            reason: "no scope selected".into(),
        })?;
        state.attempt += 1;
        state.aggregate = None;
        self.enter(state, Stage::Validating);
        Ok((
            state.attempt,
            FetchRequest {
                scope,
                parameters: state.parameters.clone(),
            },
        ))
    }

    async fn run_validation(
        &self,
        (attempt, request): (u64, FetchRequest),
    ) -> Result<Stage, WorkflowError> {
        debug!(operation = %self.operation, scope = %request.scope, "fetching population");
        let fetched = self.service.fetch(&request).await;

        let mut state = self.state();
        if state.stage != Stage::Validating || state.attempt != attempt {
            debug!(
                operation = %self.operation,
                stage = state.stage.name(),
                "discarding validation result for abandoned attempt"
            );
            return Ok(state.stage.clone());
        }
        let records = match fetched {
            Ok(records) => records,
            Err(err) => {
                warn!(operation = %self.operation, error = %err, "validation call failed");
                let reason = FailureReason::ValidationUnavailable {
                    message: err.to_string(),
                };
                return Ok(self.enter(&mut state, Stage::Failed(reason)));
            }
        };
        let store = RecordStore::new(request.scope, records);
        if store.is_empty() {
            warn!(operation = %self.operation, scope = %store.scope(), "no eligible records");
            let reason = FailureReason::NoEligibleRecords {
                scope: store.scope().clone(),
                filters: self.pipeline.predicate.clone(),
            };
            return Ok(self.enter(&mut state, Stage::Failed(reason)));
        }
        let aggregate = match self.pipeline.run(store.records()) {
            Ok(aggregate) => aggregate,
            Err(err) => {
                self.enter(&mut state, Stage::Configuring);
                return Err(err.into());
            }
        };
        if aggregate.is_empty() {
            let reason = FailureReason::NoEligibleRecords {
                scope: store.scope().clone(),
                filters: self.pipeline.predicate.clone(),
            };
            return Ok(self.enter(&mut state, Stage::Failed(reason)));
        }
        info!(
            operation = %self.operation,
            records = aggregate.summary.count,
            groups = aggregate.groups.len(),
            "population validated"
        );
        state.aggregate = Some(aggregate);
        Ok(self.enter(&mut state, Stage::ReadyToCommit))
    }

    /// The operator's explicit confirmation of the displayed summary.
    ///
    /// Issues exactly one commit call. A confirmation arriving while that
    /// commit is outstanding, or after it succeeded, changes nothing and
    /// returns the current stage.
    pub async fn confirm(&self) -> Result<Stage, WorkflowError> {
        let request = {
            let mut state = self.state();
            match &state.stage {
                Stage::ReadyToCommit => {}
                Stage::Committing | Stage::Committed => {
                    debug!(operation = %self.operation, "duplicate confirmation ignored");
                    return Ok(state.stage.clone());
                }
                other => return Err(self.refuse("confirm", other)),
            }
            let scope = state.scope.clone().ok_or(WorkflowError::ScopeInvalid {
                reason: "no scope selected".into(),
            })?;
            self.enter(&mut state, Stage::Committing);
            CommitRequest {
                operation: self.operation,
                scope,
                parameters: state.parameters.clone(),
            }
        };

        let outcome = self.service.commit(&request).await;

        let mut state = self.state();
        match outcome {
            Ok(receipt) if receipt.success => {
                info!(
                    operation = %self.operation,
                    artifact = receipt.artifact_id.as_deref().unwrap_or("-"),
                    "commit accepted"
                );
                state.receipt = Some(receipt);
                Ok(self.enter(&mut state, Stage::Committed))
            }
            Ok(receipt) => {
                warn!(operation = %self.operation, message = %receipt.message, "commit refused");
                let reason = FailureReason::CommitRejected {
                    message: receipt.message.clone(),
                };
                state.receipt = Some(receipt);
                Ok(self.enter(&mut state, Stage::Failed(reason)))
            }
            Err(err) => {
                warn!(operation = %self.operation, error = %err, "commit call failed");
                let reason = FailureReason::CommitRejected {
                    message: err.to_string(),
                };
                Ok(self.enter(&mut state, Stage::Failed(reason)))
            }
        }
    }

    /// Abandons the session. Not allowed once a commit is in flight.
    pub fn cancel(&self) -> Result<Stage, WorkflowError> {
        let mut state = self.state();
        if state.stage == Stage::Committing || state.stage.is_terminal() {
            return Err(self.refuse("cancel", &state.stage));
        }
        state.aggregate = None;
        Ok(self.enter(&mut state, Stage::Cancelled))
    }
}
