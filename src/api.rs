//! REST API handlers for nurse scheduling.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::demo_data::{self, DemoData};
use crate::domain::Period;
use crate::dto::{
    AssignmentDto, ErrorDto, HealthResponse, InfoResponse, PeriodScheduleDto, ScheduleRequestDto,
    ScheduleResultDto, StatusResponse, ValidateRequest, ValidateResponse,
};
use crate::engine::AllocationEngine;
use crate::error::SetupError;
use crate::solver::{SolverPath, SolverService};

/// Application state shared across handlers.
pub struct AppState {
    pub solver: SolverService,
}

impl AppState {
    pub fn new(solver: SolverService) -> Self {
        Self { solver }
    }

    /// In-memory store and the configured optimizer.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(SolverService::in_memory(config))
    }
}

type ApiError = (StatusCode, Json<ErrorDto>);

fn bad_request(err: &SetupError) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorDto::from(err)))
}

/// Body that is not valid JSON or does not fit the request shape.
fn malformed(rejection: JsonRejection) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorDto {
            code: "MALFORMED_INPUT".to_string(),
            message: rejection.body_text(),
        }),
    )
}

fn not_found(what: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorDto {
            code: "NOT_FOUND".to_string(),
            message: format!("{} {} not found", what, id),
        }),
    )
}

/// Creates the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health & Info
        .route("/health", get(health))
        .route("/info", get(info))
        // Demo data
        .route("/demo-data", get(list_demo_data))
        .route("/demo-data/{id}", get(get_demo_data))
        // Schedules
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/validate", put(validate_assignment))
        .route("/schedules/{id}", get(get_schedule).delete(stop_solving))
        .route("/schedules/{id}/status", get(get_schedule_status))
        // Committed schedules
        .route("/wards/{ward}/periods/{year}/{month}", get(get_period_schedule))
        .with_state(state)
}

/// GET /health - Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "UP" })
}

/// GET /info - Application info endpoint.
async fn info() -> Json<InfoResponse> {
    Json(InfoResponse {
        name: "Nurse Scheduling",
        version: env!("CARGO_PKG_VERSION"),
        solver_engine: "three-phase heuristic",
    })
}

/// GET /demo-data - List available demo data sets.
async fn list_demo_data() -> Json<Vec<&'static str>> {
    Json(demo_data::list_demo_data())
}

/// GET /demo-data/{id} - Get a specific demo data set as a request body.
async fn get_demo_data(Path(id): Path<String>) -> Result<Json<ScheduleRequestDto>, StatusCode> {
    match id.parse::<DemoData>() {
        Ok(demo) => {
            let problem = demo_data::generate(demo);
            Ok(Json(ScheduleRequestDto::from_problem(&problem, SolverPath::Heuristic)))
        }
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

/// POST /schedules - Create and start a scheduling job.
/// Returns the job ID as plain text; rejected input is a 400.
async fn create_schedule(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ScheduleRequestDto>, JsonRejection>,
) -> Result<String, ApiError> {
    let Json(dto) = payload.map_err(malformed)?;
    let problem = dto.to_problem().map_err(|e| bad_request(&e))?;
    // Surface setup errors now rather than as a failed job.
    AllocationEngine::new(problem.clone(), state.solver.engine_config().clone()).map_err(|e| bad_request(&e))?;

    let id = uuid::Uuid::new_v4().to_string();
    info!(job_id = %id, ward = %problem.ward, period = %problem.period, path = ?dto.solver_path, "Scheduling job created");
    let job = state.solver.create_job(id.clone(), problem, dto.solver_path);
    state.solver.start_solving(job);
    Ok(id)
}

/// GET /schedules - List all job IDs.
async fn list_schedules(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.solver.list_jobs())
}

/// GET /schedules/{id} - Get a job's state and result.
async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ScheduleResultDto>, ApiError> {
    let job = state.solver.get_job(&id).ok_or_else(|| not_found("schedule", &id))?;
    let guard = job.read();
    Ok(Json(ScheduleResultDto::from_job(&guard)))
}

/// GET /schedules/{id}/status - Get a job's status.
async fn get_schedule_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let job = state.solver.get_job(&id).ok_or_else(|| not_found("schedule", &id))?;
    let guard = job.read();
    Ok(Json(StatusResponse {
        solver_status: guard.status,
        complete: guard.result.as_ref().map(|r| r.outcome.summary.is_complete()),
    }))
}

/// DELETE /schedules/{id} - Cancel a job if still running and forget it.
async fn stop_solving(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    state.solver.stop_solving(&id);
    match state.solver.remove_job(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// PUT /schedules/validate - Check one proposal against a request's fixed
/// assignments and history.
async fn validate_assignment(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let Json(request) = payload.map_err(malformed)?;
    let problem = request.schedule.to_problem().map_err(|e| bad_request(&e))?;
    let engine =
        AllocationEngine::new(problem, state.solver.engine_config().clone()).map_err(|e| bad_request(&e))?;
    let check = engine
        .evaluate(&request.staff_id, request.date, request.shift_code)
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorDto {
                    code: "INVALID_PROPOSAL".to_string(),
                    message: e.to_string(),
                }),
            )
        })?;
    Ok(Json(ValidateResponse::from(check)))
}

/// GET /wards/{ward}/periods/{year}/{month} - Committed assignments. The
/// month is zero-based, like everywhere else on the wire.
async fn get_period_schedule(
    State(state): State<Arc<AppState>>,
    Path((ward, year, month)): Path<(String, i32, u32)>,
) -> Result<Json<PeriodScheduleDto>, ApiError> {
    let period = Period::month(year, month).ok_or_else(|| bad_request(&SetupError::InvalidPeriod { year, month }))?;
    let assignments = state.solver.store().load_period(&ward, &period).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorDto {
                code: "STORE".to_string(),
                message: e.to_string(),
            }),
        )
    })?;
    Ok(Json(PeriodScheduleDto {
        ward,
        period: period.to_string(),
        assignments: assignments.iter().map(AssignmentDto::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        router(Arc::new(AppState::from_config(&AppConfig::default())))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn demo_body() -> Value {
        let problem = demo_data::generate(DemoData::Small);
        serde_json::to_value(ScheduleRequestDto::from_problem(&problem, SolverPath::Heuristic)).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_demo_data() {
        let app = app();

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "UP");

        let response = app
            .clone()
            .oneshot(Request::get("/demo-data").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!(["SMALL", "LARGE"]));

        let response = app
            .clone()
            .oneshot(Request::get("/demo-data/SMALL").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["ward"], "ICU-A");
        assert_eq!(body["staff"].as_array().unwrap().len(), 12);

        let response = app
            .oneshot(Request::get("/demo-data/HUGE").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_schedule_rejects_setup_errors() {
        let mut body = demo_body();
        body["staff"] = json!([]);
        let response = app().oneshot(json_request("POST", "/schedules", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "EMPTY_ROSTER");

        let mut body = demo_body();
        body["leaveRequests"] = json!([{"staffId": "n02", "days": [40]}]);
        let response = app().oneshot(json_request("POST", "/schedules", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "INVALID_LEAVE_DAY");
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_bad_requests() {
        let mut body = demo_body();
        body.as_object_mut().unwrap().remove("policy");
        let response = app().oneshot(json_request("POST", "/schedules", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error = body_json(response).await;
        assert_eq!(error["code"], "MALFORMED_INPUT");
        assert!(error["message"].as_str().unwrap().contains("policy"));

        let mut body = demo_body();
        body["leaveRequests"] = json!([{"staffId": "n02", "days": ["x"]}]);
        let response = app().oneshot(json_request("POST", "/schedules", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "MALFORMED_INPUT");

        let mut body = demo_body();
        body["days"] = json!(["x"]);
        let response = app().oneshot(json_request("POST", "/schedules", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "MALFORMED_INPUT");

        let request = Request::builder()
            .method("POST")
            .uri("/schedules")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "MALFORMED_INPUT");

        let body = json!({"schedule": demo_body(), "staffId": "n01", "date": "tomorrow", "shiftCode": "D"});
        let response = app()
            .oneshot(json_request("PUT", "/schedules/validate", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "MALFORMED_INPUT");
    }

    #[tokio::test]
    async fn test_schedule_lifecycle() {
        let app = app();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/schedules", &demo_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let id = String::from_utf8(bytes.to_vec()).unwrap();

        let mut status = String::new();
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(Request::get(format!("/schedules/{}/status", id)).body(Body::empty()).unwrap())
                .await
                .unwrap();
            status = body_json(response).await["solverStatus"].as_str().unwrap().to_string();
            if status != "SOLVING" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(status, "COMPLETED");

        let response = app
            .clone()
            .oneshot(Request::get(format!("/schedules/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let result = body_json(response).await;
        let assigned = result["assignments"].as_array().unwrap().len();
        assert!(assigned > 0);
        assert_eq!(result["summary"]["totalAssigned"], assigned);

        let response = app
            .clone()
            .oneshot(Request::get("/wards/ICU-A/periods/2024/2").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stored = body_json(response).await;
        assert_eq!(stored["period"], "2024-03");
        assert_eq!(stored["assignments"].as_array().unwrap().len(), assigned);

        let response = app
            .clone()
            .oneshot(Request::delete(format!("/schedules/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::get(format!("/schedules/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_validate_assignment() {
        // The head nurse works days on the 1st to 5th. A night on the 5th is
        // a second shift that day, only 8h after the day shift ends.
        let body = json!({
            "schedule": demo_body(),
            "staffId": "n01",
            "date": "2024-03-05",
            "shiftCode": "N"
        });
        let response = app()
            .oneshot(json_request("PUT", "/schedules/validate", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let result = body_json(response).await;
        assert_eq!(result["valid"], false);
        assert_eq!(result["intervalClear"], false);
        assert_eq!(result["violations"][0]["code"], "REST_INTERVAL");

        let body = json!({
            "schedule": demo_body(),
            "staffId": "nobody",
            "date": "2024-03-05",
            "shiftCode": "D"
        });
        let response = app()
            .oneshot(json_request("PUT", "/schedules/validate", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
