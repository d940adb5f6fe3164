use std::path::PathBuf;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::error;

use crate::error::Error;
use crate::models::{ClassifiedBatch, ClassifiedStudentRecord};
use crate::notify::DispatchOutcome;
use crate::parser::SourceInput;
use crate::pipeline::{ManualTrigger, Pipeline, SourceSet};
use crate::report;

const UPLOAD_LIMIT: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    /// Holds the well-known source files; also served as static content.
    pub data_dir: PathBuf,
}

impl AppState {
    pub fn new(pipeline: Pipeline, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            data_dir: data_dir.into(),
        }
    }

    fn well_known(&self) -> SourceSet {
        SourceSet::well_known(&self.data_dir)
    }
}

pub fn build_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.data_dir);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/students", get(get_students))
        .route(
            "/api/upload",
            post(upload_sources).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/api/send-notification", post(send_notification))
        .route("/api/digest", get(get_digest))
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Pipeline(Error),
    BadRequest(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Pipeline(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Pipeline(err) => {
                error!(error = %err, "batch run failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/students
///
/// Classifies the well-known sources; high-risk alerts go out in the background.
pub async fn get_students(State(state): State<AppState>) -> Result<Json<ClassifiedBatch>, ApiError> {
    let run = state.pipeline.run(&state.well_known()).await?;
    Ok(Json(run.batch))
}

/// POST /api/upload
///
/// Multipart form with `attendance`, `tests` and `fees` file fields. When a
/// field is repeated the first file is used.
pub async fn upload_sources(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ClassifiedBatch>, ApiError> {
    let mut attendance: Option<Bytes> = None;
    let mut tests: Option<Bytes> = None;
    let mut fees: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let slot = match field.name() {
            Some("attendance") => &mut attendance,
            Some("tests") => &mut tests,
            Some("fees") => &mut fees,
            _ => continue,
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if slot.is_none() {
            *slot = Some(data);
        }
    }

    let take = |slot: Option<Bytes>, name: &str| {
        slot.map(|data| SourceInput::bytes(name, data))
            .ok_or_else(|| ApiError::BadRequest(format!("missing upload field: {name}")))
    };
    let sources = SourceSet::new(
        take(attendance, "attendance")?,
        take(tests, "tests")?,
        take(fees, "fees")?,
    );

    let run = state.pipeline.run(&sources).await?;
    Ok(Json(run.batch))
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub students: Option<Vec<ClassifiedStudentRecord>>,
    #[serde(rename = "emailPreviewUrl", skip_serializing_if = "Option::is_none")]
    pub email_preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/send-notification
///
/// Runs the well-known sources and sends the alert in the foreground so the
/// caller learns whether it was delivered.
pub async fn send_notification(State(state): State<AppState>) -> Response {
    match state.pipeline.trigger_notification(&state.well_known()).await {
        Ok(ManualTrigger {
            outcome: DispatchOutcome::Delivered { students, receipt },
            ..
        }) => Json(NotificationResponse {
            success: true,
            message: format!(
                "Email notification sent for {} high-risk students",
                students.len()
            ),
            students: Some(students),
            email_preview_url: receipt.preview_url,
            error: None,
        })
        .into_response(),
        Ok(ManualTrigger {
            outcome: DispatchOutcome::Skipped,
            ..
        }) => Json(NotificationResponse {
            success: false,
            message: "No high-risk students found".to_string(),
            students: None,
            email_preview_url: None,
            error: None,
        })
        .into_response(),
        Err(err) => {
            error!(error = %err, "manual notification failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(NotificationResponse {
                    success: false,
                    message: "Failed to send notification".to_string(),
                    students: None,
                    email_preview_url: None,
                    error: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// GET /api/digest
///
/// Weekly digest CSV of the MEDIUM and HIGH students. Does not notify.
pub async fn get_digest(State(state): State<AppState>) -> Result<Response, ApiError> {
    let batch = state.pipeline.classify_sources(&state.well_known()).await?;
    let body = report::weekly_digest(&batch)
        .map_err(|e| ApiError::Pipeline(Error::Io(e.into())))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"weekly_digest.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::util::ServiceExt;

    use super::*;
    use crate::notify::testing::{FailingChannel, RecordingChannel};
    use crate::notify::{Dispatcher, NotificationChannel};
    use crate::risk::RiskRules;

    const ATTENDANCE: &str = "student_id,name,attendance_percent\n1,Avery Lee,60\n2,Jules Moreno,90\n";
    const TESTS: &str = "student_id,average_score\n1,30\n";
    const FEES: &str = "student_id,days_overdue\n1,45\n";

    fn write_sources(dir: &Path, attendance: &str) {
        std::fs::write(dir.join("attendance.csv"), attendance).unwrap();
        std::fs::write(dir.join("tests.csv"), TESTS).unwrap();
        std::fs::write(dir.join("fees.csv"), FEES).unwrap();
    }

    fn app(dir: &Path, channel: Arc<dyn NotificationChannel>) -> Router {
        let dispatcher = Arc::new(Dispatcher::new(channel, "alert@dropoutguard.edu", "teacher@school.edu"));
        let pipeline = Pipeline::new(RiskRules::default(), dispatcher);
        build_router(AppState::new(pipeline, dir))
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn multipart_request(parts: &[(&str, &str)]) -> Request<Body> {
        let boundary = "dropoutguardboundary";
        let mut body = String::new();
        for (name, content) in parts {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.csv\"\r\nContent-Type: text/csv\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));

        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), Arc::new(RecordingChannel::default()))
            .oneshot(request("GET", "/health"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn students_endpoint_returns_classified_array() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), ATTENDANCE);

        let response = app(dir.path(), Arc::new(RecordingChannel::default()))
            .oneshot(request("GET", "/api/students"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let students = body.as_array().unwrap();
        assert_eq!(students.len(), 2);
        assert_eq!(students[0]["risk"], "HIGH");
        assert_eq!(students[0]["flagDetails"].as_array().unwrap().len(), 3);
        assert_eq!(students[1]["risk"], "LOW");
        assert!(students[1].get("average_score").is_none());
    }

    #[tokio::test]
    async fn students_endpoint_ignores_notification_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), ATTENDANCE);

        let response = app(dir.path(), Arc::new(FailingChannel))
            .oneshot(request("GET", "/api/students"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_source_is_a_server_error() {
        let dir = tempfile::tempdir().unwrap();

        let response = app(dir.path(), Arc::new(RecordingChannel::default()))
            .oneshot(request("GET", "/api/students"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("failed to read"));
    }

    #[tokio::test]
    async fn upload_classifies_the_posted_files() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart_request(&[
            ("attendance", "student_id,name,attendance_percent\n7,Noah Brooks,50"),
            ("tests", "student_id,average_score\n7,20"),
            ("fees", "student_id,days_overdue\n7,0"),
        ]);

        let response = app(dir.path(), Arc::new(RecordingChannel::default()))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body[0]["student_id"], "7");
        assert_eq!(body[0]["risk"], "HIGH");
        assert_eq!(body[0]["flagDetails"][1], "Low score: 20");
    }

    #[tokio::test]
    async fn upload_without_fees_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart_request(&[
            ("attendance", "student_id,attendance_percent\n1,60"),
            ("tests", "student_id,average_score\n1,30"),
        ]);

        let response = app(dir.path(), Arc::new(RecordingChannel::default()))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "missing upload field: fees");
    }

    #[tokio::test]
    async fn manual_notification_returns_preview() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), ATTENDANCE);
        let channel = Arc::new(RecordingChannel::default());

        let response = app(dir.path(), channel.clone())
            .oneshot(request("POST", "/api/send-notification"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Email notification sent for 1 high-risk students");
        assert_eq!(body["students"].as_array().unwrap().len(), 1);
        assert!(body["emailPreviewUrl"].as_str().unwrap().starts_with("memory://"));
        assert_eq!(channel.sent_count(), 1);
    }

    #[tokio::test]
    async fn manual_notification_without_high_risk() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), "student_id,attendance_percent\n2,90\n");

        let response = app(dir.path(), Arc::new(RecordingChannel::default()))
            .oneshot(request("POST", "/api/send-notification"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "No high-risk students found");
        assert!(body.get("students").is_none());
    }

    #[tokio::test]
    async fn manual_notification_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), ATTENDANCE);

        let response = app(dir.path(), Arc::new(FailingChannel))
            .oneshot(request("POST", "/api/send-notification"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Failed to send notification");
        assert!(body["error"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn digest_is_served_as_csv() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), ATTENDANCE);

        let response = app(dir.path(), Arc::new(RecordingChannel::default()))
            .oneshot(request("GET", "/api/digest"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.lines().nth(1), Some("1,Avery Lee,60,30,45,HIGH"));
        assert_eq!(text.lines().count(), 2);
    }
}
