//! HTTP API for the payroll batch engine.
//!
//! This module exposes the shared pipeline and the exporter over a
//! minimal REST API using [`axum`](https://crates.io/crates/axum).
//! Records come from the configured [`PayrollService`]; each request
//! names its scope explicitly.

use crate::config::Config;
use crate::engine::{settlement_preview, Aggregate, Pipeline};
use crate::error::{EngineError, ServiceError};
use crate::export::{export_artifact, ColumnSpec, ExportArtifact};
use crate::models::{OperationParameters, Scope};
use crate::service::{FetchRequest, PayrollService, SettlementCalculator, SnapshotService};
use anyhow::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Application state shared across requests.
pub struct AppState {
    pub service: Arc<dyn PayrollService>,
    pub calculator: Arc<dyn SettlementCalculator>,
}

/// Build the API router over the snapshots found in `snapshot_dir`.
/// Returns the router and a handle to the state.
pub fn build_router(snapshot_dir: &Path) -> Result<(Router, Arc<AppState>)> {
    let snapshots = Arc::new(SnapshotService::from_dir(snapshot_dir)?);
    let state = Arc::new(AppState {
        service: snapshots.clone(),
        calculator: snapshots,
    });
    Ok((router(state.clone()), state))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/aggregate", post(aggregate_handler))
        .route("/api/export", post(export_handler))
        .route("/api/settlements", post(settlements_handler))
        .with_state(state)
}

/// Failure of a request, mapped onto a status code.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    Engine(EngineError),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(ServiceError::UnknownSubject(_)) => StatusCode::NOT_FOUND,
            ApiError::Service(_) => StatusCode::BAD_GATEWAY,
            ApiError::Engine(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Service(err) => err.to_string(),
            ApiError::Engine(err) => err.to_string(),
        };
        warn!(error = %message, "request failed");
        let body = Json(serde_json::json!({ "error": message }));
        (self.status(), body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct AggregateRequest {
    pub scope: Scope,
    #[serde(default)]
    pub parameters: OperationParameters,
    #[serde(default)]
    pub pipeline: Pipeline,
}

async fn fetch_and_run(state: &AppState, request: &AggregateRequest) -> Result<Aggregate, ApiError> {
    let fetch = FetchRequest {
        scope: request.scope.clone(),
        parameters: request.parameters.clone(),
    };
    let records = state.service.fetch(&fetch).await?;
    Ok(request.pipeline.run(&records)?)
}

/// Handler for POST /api/aggregate
pub async fn aggregate_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AggregateRequest>,
) -> Result<Json<Aggregate>, ApiError> {
    let aggregate = fetch_and_run(&state, &request).await?;
    info!(scope = %request.scope, records = aggregate.summary.count, "aggregate served");
    Ok(Json(aggregate))
}

/// Which column layout an export uses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPreset {
    PayrollRegister,
    BankTransfer,
    /// One row per group of the pipeline.
    GroupSummary {
        key_header: String,
        fields: Vec<String>,
    },
    Custom(ColumnSpec),
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(flatten)]
    pub query: AggregateRequest,
    pub preset: ExportPreset,
    #[serde(default = "default_label")]
    pub label: String,
}

fn default_label() -> String {
    "export".to_string()
}

fn build_export(request: &ExportRequest, aggregate: &Aggregate) -> Result<ExportArtifact, EngineError> {
    let scope = &request.query.scope;
    match &request.preset {
        ExportPreset::PayrollRegister => export_artifact(
            scope,
            &request.label,
            &aggregate.records,
            &ColumnSpec::payroll_register(),
        ),
        ExportPreset::BankTransfer => export_artifact(
            scope,
            &request.label,
            &aggregate.records,
            &ColumnSpec::bank_transfer(),
        ),
        ExportPreset::GroupSummary { key_header, fields } => {
            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            export_artifact(
                scope,
                &request.label,
                &aggregate.groups,
                &ColumnSpec::group_summary(key_header, &fields),
            )
        }
        ExportPreset::Custom(spec) => {
            export_artifact(scope, &request.label, &aggregate.records, spec)
        }
    }
}

/// Handler for POST /api/export
pub async fn export_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, ApiError> {
    let aggregate = fetch_and_run(&state, &request.query).await?;
    let artifact = build_export(&request, &aggregate)?;
    info!(file = %artifact.file_name, rows = artifact.rows, "export served");
    let headers = [
        (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.file_name),
        ),
    ];
    Ok((StatusCode::OK, headers, artifact.content).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SettlementRequest {
    pub subjects: Vec<String>,
    #[serde(default)]
    pub parameters: OperationParameters,
    pub period: String,
    #[serde(default)]
    pub pipeline: Pipeline,
}

/// Handler for POST /api/settlements
pub async fn settlements_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SettlementRequest>,
) -> Result<Json<Aggregate>, ApiError> {
    let records = settlement_preview(
        state.calculator.as_ref(),
        &request.subjects,
        &request.parameters,
        &request.period,
    )?;
    Ok(Json(request.pipeline.run(&records)?))
}

/// Launch the API server and block until it terminates.
pub async fn serve(config: &Config) -> Result<()> {
    let (router, _state) = build_router(&config.snapshot_dir)?;
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Condition, Predicate};
    use crate::group::GroupKey;
    use crate::models::fixtures::{banked, scope};
    use crate::models::Period;
    use crate::service::Snapshot;
    use crate::sort::{SortLevel, SortSpec};
    use rust_decimal::Decimal;

    fn state() -> Arc<AppState> {
        let mut first = banked("1", "BNS", 500_000);
        first.amounts.insert("notice_pay".into(), Decimal::from(25));
        let snapshots = Arc::new(SnapshotService::new(vec![Snapshot {
            company_id: "ACME".into(),
            period: Period::Pay("2024-03".into()),
            records: vec![first, banked("2", "NCB", 300_000), banked("3", "BNS", 100_000)],
        }]));
        Arc::new(AppState {
            service: snapshots.clone(),
            calculator: snapshots,
        })
    }

    fn by_bank() -> Pipeline {
        Pipeline {
            group_by: Some(GroupKey::by("bank")),
            group_order: SortSpec::by(SortLevel::desc("net")),
            ..Pipeline::default()
        }
    }

    #[tokio::test]
    async fn aggregate_groups_fetched_records() {
        let request = AggregateRequest {
            scope: scope("ACME"),
            parameters: OperationParameters::default(),
            pipeline: by_bank()
                .with_predicate(Predicate::all().and(Condition::greater_than("net", 200_000.into()))),
        };
        let Json(aggregate) = aggregate_handler(State(state()), Json(request)).await.unwrap();
        let keys: Vec<_> = aggregate.groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, ["BNS", "NCB"]);
        assert_eq!(aggregate.summary.total("net"), Decimal::from(800_000));
    }

    #[tokio::test]
    async fn export_names_file_from_scope() {
        let request: ExportRequest = serde_json::from_value(serde_json::json!({
            "scope": {"company_id": "ACME", "period": {"pay": "2024-03"}, "population": "entire"},
            "preset": {"group_summary": {"key_header": "Bank", "fields": ["net"]}},
            "pipeline": {"group_by": {"field": "bank"}},
            "label": "bank summary"
        }))
        .unwrap();
        let response = export_handler(State(state()), Json(request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert_eq!(disposition, "attachment; filename=\"ACME_2024-03_bank_summary.csv\"");
    }

    #[tokio::test]
    async fn settlements_preview_runs_through_pipeline() {
        let request = SettlementRequest {
            subjects: vec!["1".into(), "2".into()],
            parameters: OperationParameters::default(),
            period: "2024".into(),
            pipeline: Pipeline::default(),
        };
        let Json(aggregate) = settlements_handler(State(state()), Json(request)).await.unwrap();
        assert_eq!(aggregate.summary.count, 2);
        assert_eq!(aggregate.summary.total("notice_pay"), Decimal::from(25));

        let missing = SettlementRequest {
            subjects: vec!["nobody".into()],
            parameters: OperationParameters::default(),
            period: "2024".into(),
            pipeline: Pipeline::default(),
        };
        let err = settlements_handler(State(state()), Json(missing)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn engine_errors_are_bad_requests() {
        let err = ApiError::from(EngineError::NoColumns);
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        let err = ApiError::from(ServiceError::Unavailable("down".into()));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
