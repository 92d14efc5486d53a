use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use reviewpulse_common::types::{Job, JobState, SourceId};
use reviewpulse_store::{JobStore, TaskQueue};

pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn TaskQueue>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/research", post(submit))
        .route("/api/jobs/{id}/status", get(status))
        .route("/api/jobs/{id}/result", get(result))
        .route("/api/jobs/{id}/report", get(report))
        .route("/api/jobs/{id}/cancel", post(cancel))
        .with_state(state)
}

// --- Error plumbing ---

struct ApiError(StatusCode, String);

impl ApiError {
    fn not_found(what: &str) -> Self {
        Self(StatusCode::NOT_FOUND, format!("{what} not found"))
    }

    fn internal(err: anyhow::Error) -> Self {
        error!(error = %format!("{err:#}"), "API internal error");
        Self(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_string(),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// --- Request/response types ---

#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    pub product_name: String,
    // Optional financial context; improves the risk numbers.
    pub monthly_active_users: Option<i64>,
    pub avg_revenue_per_user: Option<f64>,
    /// Optional source preference set; omit for all configured sources.
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub state: JobState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub state: JobState,
    pub stage: String,
    pub progress: i16,
    pub error: Option<String>,
    pub report_url: Option<String>,
}

impl StatusResponse {
    fn from_job(job: &Job) -> Self {
        let report_url = if job.state == JobState::Done {
            Some(format!("/api/jobs/{}/report", job.id))
        } else {
            None
        };
        Self {
            job_id: job.id,
            state: job.state,
            stage: job.stage.clone(),
            progress: job.progress,
            // The error column already carries the masked, user-facing
            // message; internal diagnostics live only in the transition log.
            error: job.error.clone(),
            report_url,
        }
    }
}

// --- Handlers ---

async fn health() -> &'static str {
    "ok"
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResearchRequest>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let product_name = req.product_name.trim().to_string();
    if product_name.is_empty() {
        return Err(ApiError(
            StatusCode::UNPROCESSABLE_ENTITY,
            "product_name is required".to_string(),
        ));
    }

    let sources = match req.sources {
        Some(raw) => {
            let mut parsed = Vec::new();
            for entry in raw {
                match SourceId::from_str_loose(&entry) {
                    Some(source) => parsed.push(source),
                    None => {
                        return Err(ApiError(
                            StatusCode::UNPROCESSABLE_ENTITY,
                            format!("unknown source '{entry}'"),
                        ))
                    }
                }
            }
            Some(parsed)
        }
        None => None,
    };

    let job = Job {
        id: Uuid::new_v4(),
        product_name,
        mau: req.monthly_active_users,
        arpu: req.avg_revenue_per_user,
        sources,
        state: JobState::Queued,
        progress: 0,
        stage: "Queued — waiting for worker".to_string(),
        error: None,
        result: None,
        items: None,
        report_path: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        completed_at: None,
    };

    state.store.create_job(&job).await.map_err(ApiError::internal)?;
    state.queue.enqueue(job.id).await.map_err(ApiError::internal)?;
    info!(job_id = %job.id, product = job.product_name.as_str(), "Job submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobResponse {
            job_id: job.id,
            state: job.state,
            message: format!("Job queued. Poll /api/jobs/{}/status for updates.", job.id),
        }),
    ))
}

async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StatusResponse>> {
    let job = state
        .store
        .get_job(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("job"))?;
    Ok(Json(StatusResponse::from_job(&job)))
}

async fn result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let job = state
        .store
        .get_job(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("job"))?;
    match (job.state, job.result) {
        (JobState::Done, Some(result)) => Ok(Json(result).into_response()),
        _ => Err(ApiError(
            StatusCode::CONFLICT,
            "no result yet".to_string(),
        )),
    }
}

async fn report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let job = state
        .store
        .get_job(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("job"))?;
    let path = match (job.state, job.report_path) {
        (JobState::Done, Some(path)) => path,
        _ => return Err(ApiError::not_found("report")),
    };
    let content =
        std::fs::read_to_string(&path).map_err(|_| ApiError::not_found("report"))?;
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        content,
    )
        .into_response())
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StatusResponse>> {
    let job = state
        .store
        .get_job(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("job"))?;
    if job.state.is_terminal() {
        return Err(ApiError(
            StatusCode::CONFLICT,
            "job already finished".to_string(),
        ));
    }
    state
        .store
        .request_cancel(id)
        .await
        .map_err(ApiError::internal)?;
    info!(job_id = %id, "Cancellation requested");

    let job = state
        .store
        .get_job(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("job"))?;
    Ok(Json(StatusResponse::from_job(&job)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use reviewpulse_common::types::AnalysisResult;
    use reviewpulse_store::{MemoryJobStore, MemoryQueue};
    use tower::ServiceExt;

    fn test_app() -> (Router, Arc<MemoryJobStore>, Arc<MemoryQueue>) {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let state = Arc::new(AppState {
            store: store.clone(),
            queue: queue.clone(),
        });
        (router(state), store, queue)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_creates_queued_job() {
        let (app, store, queue) = test_app();
        let response = app
            .oneshot(post_json(
                "/api/research",
                serde_json::json!({
                    "product_name": "Acme Notes",
                    "monthly_active_users": 5000,
                    "avg_revenue_per_user": 9.5
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
        assert_eq!(body["state"], "queued");

        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.mau, Some(5000));
        assert_eq!(queue.claim("w").await.unwrap(), Some(job_id));
    }

    #[tokio::test]
    async fn submit_rejects_blank_product_name() {
        let (app, _, _) = test_app();
        let response = app
            .oneshot(post_json(
                "/api/research",
                serde_json::json!({ "product_name": "   " }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn submit_rejects_unknown_source() {
        let (app, _, _) = test_app();
        let response = app
            .oneshot(post_json(
                "/api/research",
                serde_json::json!({ "product_name": "Acme", "sources": ["reddit", "myspace"] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("myspace"));
    }

    #[tokio::test]
    async fn status_for_unknown_job_is_404() {
        let (app, _, _) = test_app();
        let response = app
            .oneshot(get(&format!("/api/jobs/{}/status", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn result_unavailable_before_done() {
        let (app, store, _) = test_app();
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/research",
                serde_json::json!({ "product_name": "Acme" }),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();

        let response = app
            .clone()
            .oneshot(get(&format!("/api/jobs/{job_id}/result")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        store
            .complete_job(job_id, &AnalysisResult::default(), None)
            .await
            .unwrap();
        let response = app
            .oneshot(get(&format!("/api/jobs/{job_id}/result")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cancel_sets_flag_and_rejects_terminal_jobs() {
        let (app, store, _) = test_app();
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/research",
                serde_json::json!({ "product_name": "Acme" }),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();

        let response = app
            .clone()
            .oneshot(post_json(&format!("/api/jobs/{job_id}/cancel"), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.cancel_requested(job_id).await.unwrap());

        store.cancel_job(job_id).await.unwrap();
        let response = app
            .oneshot(post_json(&format!("/api/jobs/{job_id}/cancel"), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn report_missing_until_rendered() {
        let (app, _, _) = test_app();
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/research",
                serde_json::json!({ "product_name": "Acme" }),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();

        let response = app
            .oneshot(get(&format!("/api/jobs/{job_id}/report")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
