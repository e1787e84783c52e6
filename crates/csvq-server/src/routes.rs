//! HTTP surface: upload, query, session info and session delete.
//!
//! Parse and session-lookup failures are request-level errors (400/404);
//! orchestration failures are a normal outcome class and travel as a 200
//! with `success=false`.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use csvq_agent::{assemble, Orchestrator, Planner, QueryResult};
use csvq_common::errors::{ParseError, SessionError};
use csvq_data::Dataset;

use crate::config::Config;
use crate::registry::SessionRegistry;

pub struct AppState {
    pub registry: SessionRegistry,
    pub planner: Arc<dyn Planner>,
    pub config: Config,
}

pub fn router(state: Arc<AppState>) -> Router {
    // Slack on top of the upload limit so our own size check produces the
    // error, not the framework's.
    let body_limit = state.config.max_upload_bytes + 64 * 1024;
    Router::new()
        .route("/", get(root))
        .route("/upload", post(upload))
        .route("/query", post(query))
        .route("/session/:id", get(session_info).delete(delete_session))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

enum ApiError {
    Parse(ParseError),
    Session(SessionError),
}

impl From<ParseError> for ApiError {
    fn from(err: ParseError) -> Self {
        ApiError::Parse(err)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Session(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Parse(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            ApiError::Session(err) => (StatusCode::NOT_FOUND, err.to_string()),
        };
        (status, Json(json!({ "detail": message }))).into_response()
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "csvq server is running" }))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut declared_encoding: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ParseError::MalformedInput(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);

        if name.as_deref() == Some("encoding") {
            let text = field
                .text()
                .await
                .map_err(|e| ParseError::MalformedInput(e.to_string()))?;
            declared_encoding = Some(text);
        } else if file_name.is_some() || name.as_deref() == Some("file") {
            let filename = file_name.unwrap_or_else(|| "upload.csv".to_string());
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ParseError::MalformedInput(e.to_string()))?;
            file = Some((filename, bytes.to_vec()));
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| ParseError::MalformedInput("missing 'file' field".into()))?;
    if !filename.to_ascii_lowercase().ends_with(".csv") {
        return Err(ParseError::MalformedInput("only CSV files are allowed".into()).into());
    }

    let dataset = Dataset::parse(
        &bytes,
        declared_encoding.as_deref(),
        state.config.max_upload_bytes,
    )?;
    let columns = dataset.column_names();
    let rows = dataset.row_count();
    let columns_count = dataset.column_count();

    let session_id = state.registry.create(dataset, &filename).await;
    info!(session_id = %session_id, filename = %filename, rows, "dataset uploaded");

    Ok(Json(json!({
        "session_id": session_id,
        "filename": filename,
        "columns": columns,
        "rows": rows,
        "columns_count": columns_count,
    })))
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    session_id: String,
    query: String,
}

async fn query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResult>, ApiError> {
    // The handle marks the session in use, deferring eviction until the run
    // finishes; it is released on drop even if the run times out.
    let session = state.registry.checkout(&request.session_id).await?;
    info!(session_id = %request.session_id, "processing query");

    let orchestrator = Orchestrator::new(
        state.planner.clone(),
        state.config.turn_limit,
        state.config.run_timeout,
    );
    let outcome = orchestrator
        .run(&session.dataset, &session.filename, &request.query)
        .await;

    Ok(Json(assemble(outcome, &request.query)))
}

async fn session_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state.registry.get(&id).await?;
    Ok(Json(json!({
        "filename": session.filename,
        "columns": session.dataset.column_names(),
        "shape": [session.dataset.row_count(), session.dataset.column_count()],
        "created_at": session.created_at.to_rfc3339(),
    })))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.delete(&id).await?;
    info!(session_id = %id, "session deleted");
    Ok(Json(json!({ "message": "Session deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use tokio::sync::Mutex;
    use tower::util::ServiceExt;

    use csvq_common::types::{Message, TokenUsage, ToolCall, ToolDefinition};
    use csvq_agent::{PlannerError, PlannerResponse};

    /// Deterministic planner for end-to-end tests: pops one scripted step
    /// per call.
    struct ScriptedPlanner {
        steps: Mutex<VecDeque<Result<PlannerResponse, PlannerError>>>,
    }

    impl ScriptedPlanner {
        fn new(steps: Vec<Result<PlannerResponse, PlannerError>>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
            })
        }
    }

    #[async_trait]
    impl Planner for ScriptedPlanner {
        async fn plan(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<PlannerResponse, PlannerError> {
            self.steps
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(PlannerError::Api("script exhausted".into())))
        }
    }

    fn app(planner: Arc<dyn Planner>) -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState {
            registry: SessionRegistry::new(Duration::from_secs(60)),
            planner,
            config: Config::default(),
        });
        (router(state.clone()), state)
    }

    fn answer(text: &str) -> Result<PlannerResponse, PlannerError> {
        Ok(PlannerResponse::answer(text))
    }

    fn tool_step(name: &str, arguments: Value) -> Result<PlannerResponse, PlannerError> {
        Ok(PlannerResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_0".into(),
                name: name.into(),
                arguments,
            }],
            usage: TokenUsage::default(),
        })
    }

    const BOUNDARY: &str = "csvq-test-boundary";

    fn multipart_upload(filename: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"{filename}\"\r\nContent-Type: text/csv\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const SALES_CSV: &[u8] = b"month,sales\nJan,100\nFeb,300\nMar,200\n";

    async fn upload_sales(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(multipart_upload("sales.csv", SALES_CSV))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["rows"], 3);
        assert_eq!(json["columns_count"], 2);
        assert_eq!(json["columns"][0], "month");
        json["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn upload_then_query_highest_sales() {
        let planner = ScriptedPlanner::new(vec![
            tool_step(
                "analyze_data",
                json!({"operation": "sort", "column": "sales", "descending": true, "limit": 1}),
            ),
            answer("Feb had the highest sales at 300."),
        ]);
        let (app, _) = self::app(planner);

        let session_id = upload_sales(&app).await;
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/query",
                json!({"session_id": session_id, "query": "which month had the highest sales?"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        let result = json["result"].as_str().unwrap();
        assert!(result.contains("Feb"));
        assert!(result.contains("300"));
        assert_eq!(json["query"], "which month had the highest sales?");
        // The sort produced tabular data for the caller too.
        assert_eq!(json["data"][0]["month"], "Feb");
    }

    #[tokio::test]
    async fn query_returns_visualization_payload() {
        let planner = ScriptedPlanner::new(vec![
            tool_step(
                "create_visualization",
                json!({"chart_type": "bar", "x_column": "month", "y_column": "sales"}),
            ),
            answer("Here is the chart."),
        ]);
        let (app, _) = self::app(planner);

        let session_id = upload_sales(&app).await;
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/query",
                json!({"session_id": session_id, "query": "plot sales by month"}),
            ))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        let viz: Value =
            serde_json::from_str(json["visualization"].as_str().unwrap()).unwrap();
        assert_eq!(viz["chart_type"], "bar");
        assert_eq!(viz["x"][1], "Feb");
        assert_eq!(viz["y"][1], 300.0);
    }

    #[tokio::test]
    async fn query_unknown_session_is_404() {
        let (app, _) = self::app(ScriptedPlanner::new(vec![]));
        let response = app
            .oneshot(json_request(
                "POST",
                "/query",
                json!({"session_id": "never-created", "query": "anything"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["detail"], "session not found or expired");
    }

    #[tokio::test]
    async fn deleted_session_cannot_be_queried() {
        let planner = ScriptedPlanner::new(vec![answer("unused")]);
        let (app, _) = self::app(planner);

        let session_id = upload_sales(&app).await;
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/session/{session_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Session deleted successfully");

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/query",
                json!({"session_id": session_id, "query": "anything"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn session_info_reports_shape() {
        let (app, _) = self::app(ScriptedPlanner::new(vec![]));
        let session_id = upload_sales(&app).await;

        let response = app
            .clone()
            .oneshot(get_request(&format!("/session/{session_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["filename"], "sales.csv");
        assert_eq!(json["shape"][0], 3);
        assert_eq!(json["shape"][1], 2);
        assert!(json["created_at"].as_str().is_some());
    }

    #[tokio::test]
    async fn session_info_unknown_id_is_404() {
        let (app, _) = self::app(ScriptedPlanner::new(vec![]));
        let response = app
            .oneshot(get_request("/session/missing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_rejects_non_csv_filename() {
        let (app, _) = self::app(ScriptedPlanner::new(vec![]));
        let response = app
            .oneshot(multipart_upload("data.xlsx", b"not,a\ncsv,file\n"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["detail"]
            .as_str()
            .unwrap()
            .contains("only CSV files are allowed"));
    }

    #[tokio::test]
    async fn upload_rejects_oversized_payload_without_storing_a_session() {
        let (app, state) = self::app(ScriptedPlanner::new(vec![]));

        let mut big = Vec::from(&b"col\n"[..]);
        big.resize(state.config.max_upload_bytes + 1, b'x');
        let response = app.oneshot(multipart_upload("big.csv", &big)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["detail"].as_str().unwrap().contains("upload limit"));
        assert_eq!(state.registry.count().await, 0);
    }

    #[tokio::test]
    async fn upload_rejects_headerless_payload() {
        let (app, _) = self::app(ScriptedPlanner::new(vec![]));
        let response = app.oneshot(multipart_upload("empty.csv", b"")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn orchestration_failure_is_a_200_with_success_false() {
        // A planner that keeps requesting tools until the turn limit trips.
        let steps: Vec<_> = (0..10)
            .map(|_| tool_step("get_data_info", json!({})))
            .collect();
        let (app, _) = self::app(ScriptedPlanner::new(steps));

        let session_id = upload_sales(&app).await;
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/query",
                json!({"session_id": session_id, "query": "loop forever"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("analysis steps"));
        assert!(json.get("result").is_none());
    }

    #[tokio::test]
    async fn repeated_query_sees_the_same_tool_results() {
        // Two identical runs against the same session: the scripted steps
        // differ in phrasing, the underlying tool results must not.
        let planner = ScriptedPlanner::new(vec![
            tool_step(
                "execute_query",
                json!({"expression": "max(sales)"}),
            ),
            answer("The highest sales figure is 300."),
            tool_step(
                "execute_query",
                json!({"expression": "max(sales)"}),
            ),
            answer("300 is the top value."),
        ]);
        let (app, _) = self::app(planner);

        let session_id = upload_sales(&app).await;
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/query",
                    json!({"session_id": session_id, "query": "highest sales?"}),
                ))
                .await
                .unwrap();
            let json = body_json(response).await;
            assert_eq!(json["success"], true);
            assert!(json["result"].as_str().unwrap().contains("300"));
        }
    }

    #[tokio::test]
    async fn root_reports_liveness() {
        let (app, _) = self::app(ScriptedPlanner::new(vec![]));
        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
