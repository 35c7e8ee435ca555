//! Run handlers: browsing stored results and starting sweeps, steps and
//! host redos.
//!
//! Reads go straight to the `ResultStore`. Anything that measures runs as a
//! background job (see [`crate::jobs`]) and answers `202 Accepted` with the
//! job descriptor.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;

use fragbench_core::{Environment, QueryName, RunId, StepPercent};
use fragbench_sweep::validate_plan;

use crate::ApiState;
use crate::jobs::{JobInfo, JobKind};
use crate::response::{ApiResponse, busy, error_response, failure, reply};

pub const GREETING: &str = "fragbench API server";

fn parse_run(id: &str) -> Result<RunId, Response> {
    RunId::parse(id).map_err(failure)
}

fn parse_step(task: &str) -> Result<StepPercent, Response> {
    task.parse::<StepPercent>().map_err(failure)
}

fn parse_query(query: &str) -> Result<QueryName, Response> {
    QueryName::parse(query).map_err(failure)
}

fn accepted(info: JobInfo) -> Response {
    (StatusCode::ACCEPTED, ApiResponse::ok(info)).into_response()
}

/// GET /
pub async fn hello() -> &'static str {
    GREETING
}

// ── Runs ───────────────────────────────────────────────────────

/// GET /works
pub async fn list_works(State(state): State<ApiState>) -> Response {
    reply(state.store().list_runs().await)
}

/// GET /works/{id}
pub async fn get_work(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let run = match parse_run(&id) {
        Ok(run) => run,
        Err(resp) => return resp,
    };
    match state.store().get_run(&run).await {
        Ok(tree) => ApiResponse::ok(tree.as_ref()).into_response(),
        Err(e) => failure(e),
    }
}

/// GET /works/{id}/tasks
pub async fn list_tasks(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match parse_run(&id) {
        Ok(run) => reply(state.store().list_steps(&run).await),
        Err(resp) => resp,
    }
}

/// GET /works/{id}/queries
pub async fn list_queries(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match parse_run(&id) {
        Ok(run) => reply(state.store().list_queries(&run).await),
        Err(resp) => resp,
    }
}

/// GET /works/{id}/external-db-sizes
pub async fn snapshot_sizes(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match parse_run(&id) {
        Ok(run) => reply(state.store().snapshot_sizes(&run).await),
        Err(resp) => resp,
    }
}

/// GET /works/{id}/android/time
pub async fn device_times(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match parse_run(&id) {
        Ok(run) => reply(state.store().timing_table(&run, Environment::Device).await),
        Err(resp) => resp,
    }
}

/// GET /works/{id}/host/time
pub async fn host_times(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match parse_run(&id) {
        Ok(run) => reply(state.store().timing_table(&run, Environment::Host).await),
        Err(resp) => resp,
    }
}

/// GET /works/{id}/queries/{query}/vdbe
pub async fn profile_series(
    State(state): State<ApiState>,
    Path((id, query)): Path<(String, String)>,
) -> Response {
    let (run, query) = match (parse_run(&id), parse_query(&query)) {
        (Ok(run), Ok(query)) => (run, query),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    reply(state.store().profile_series(&run, &query).await)
}

// ── Measurements ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepParams {
    pub percentage_interval: u32,
    pub percentage_to: u32,
}

/// Query subset for a step or redo. An empty list means the whole catalog.
#[derive(Debug, Default, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub queries: Vec<String>,
}

/// POST /works?percentageInterval=10&percentageTo=90
pub async fn start_sweep(
    State(state): State<ApiState>,
    Query(params): Query<SweepParams>,
) -> Response {
    if let Err(e) = validate_plan(params.percentage_interval, params.percentage_to) {
        return failure(e);
    }

    let run = RunId::now();
    let pipeline = state.pipeline.clone();
    let job_run = run.clone();
    let spawned = state
        .jobs
        .spawn(JobKind::Sweep, Some(run), move |mut device, cancel| async move {
            pipeline
                .run_sweep_as(
                    job_run,
                    &mut device,
                    params.percentage_interval,
                    params.percentage_to,
                    &cancel,
                )
                .await
        })
        .await;

    match spawned {
        Ok((info, _)) => accepted(info),
        Err(_) => busy(),
    }
}

/// POST /works/cancel
pub async fn cancel_job(State(state): State<ApiState>) -> Response {
    match state.jobs.cancel().await {
        Some(info) => ApiResponse::ok(info).into_response(),
        None => error_response("no job is running", StatusCode::NOT_FOUND).into_response(),
    }
}

/// GET /jobs
pub async fn job_status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(serde_json::json!({
        "current": state.jobs.current().await,
        "last": state.jobs.last().await,
    }))
    .into_response()
}

/// POST /works/{id}/tasks/{task}
///
/// Pushes the query set, exports the snapshot and measures the queries at
/// the current occupancy, filed under `task`.
pub async fn run_task(
    State(state): State<ApiState>,
    Path((id, task)): Path<(String, String)>,
    body: Option<Json<TaskRequest>>,
) -> Response {
    let (run, step) = match (parse_run(&id), parse_step(&task)) {
        (Ok(run), Ok(step)) => (run, step),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let names = body.map(|Json(b)| b.queries).unwrap_or_default();
    let queries = match state.pipeline.catalog().select(&names).await {
        Ok(queries) => queries,
        Err(e) => return failure(e),
    };

    let pipeline = state.pipeline.clone();
    let job_run = run.clone();
    let spawned = state
        .jobs
        .spawn(JobKind::Step, Some(run), move |mut device, cancel| async move {
            pipeline.push_queries(&mut device).await?;
            pipeline
                .run_step(&mut device, &job_run, step, &queries, &cancel)
                .await
        })
        .await;

    match spawned {
        Ok((info, _)) => accepted(info),
        Err(_) => busy(),
    }
}

/// POST /works/{id}/tasks/{task}/export-db
pub async fn export_db(
    State(state): State<ApiState>,
    Path((id, task)): Path<(String, String)>,
) -> Response {
    let (run, step) = match (parse_run(&id), parse_step(&task)) {
        (Ok(run), Ok(step)) => (run, step),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(state.pipeline.export_snapshot(&mut device, &run, step).await)
}

/// POST /works/{id}/redo-host-work
pub async fn redo_host_work(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<TaskRequest>>,
) -> Response {
    let run = match parse_run(&id) {
        Ok(run) => run,
        Err(resp) => return resp,
    };
    if let Err(e) = state.store().list_steps(&run).await {
        return failure(e);
    }
    let names = body.map(|Json(b)| b.queries).unwrap_or_default();
    let queries = match state.pipeline.catalog().select(&names).await {
        Ok(queries) => queries,
        Err(e) => return failure(e),
    };
    info!(run = %run, queries = queries.len(), "host redo requested");

    let pipeline = state.pipeline.clone();
    let job_run = run.clone();
    let spawned = state
        .jobs
        .spawn(JobKind::RedoHost, Some(run), move |device, cancel| async move {
            // Host replays share the run's files with device jobs.
            let _device = device;
            pipeline
                .redo_host_executions(&job_run, &queries, &cancel)
                .await
        })
        .await;

    match spawned {
        Ok((info, _)) => accepted(info),
        Err(_) => busy(),
    }
}
