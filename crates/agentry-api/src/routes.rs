use std::convert::Infallible;

use agentry_core::{Agent, CatalogError, RunEvent, RunOptions, RunResponse, Team, SUPPORTED_MODELS};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::openai::{stream_chunks, ChatCompletion, ChunkContext};
use crate::{AppState, ROUTES};

/// Models a run may ask for. Anything else fails deserialization (422).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelChoice {
    #[default]
    #[serde(rename = "gpt-4.1")]
    Gpt41,
    #[serde(rename = "o4-mini")]
    O4Mini,
    #[serde(rename = "o3")]
    O3,
}

impl ModelChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt41 => "gpt-4.1",
            Self::O4Mini => "o4-mini",
            Self::O3 => "o3",
        }
    }
}

fn default_stream() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub message: String,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub model: ModelChoice,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl RunRequest {
    fn options(&self) -> RunOptions {
        RunOptions {
            model_id: Some(self.model.as_str().to_string()),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            debug_mode: false,
        }
    }
}

pub(crate) enum ApiError {
    NotFound(String),
    Internal(String),
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        if e.is_not_found() {
            Self::NotFound(e.to_string())
        } else {
            error!("{e}");
            Self::Internal(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::NotFound(d) => (StatusCode::NOT_FOUND, d),
            Self::Internal(d) => (StatusCode::INTERNAL_SERVER_ERROR, d),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Agent or team, answered the same way.
enum Runner {
    Agent(Agent),
    Team(Team),
}

impl Runner {
    fn model(&self) -> &str {
        match self {
            Self::Agent(a) => a.model(),
            Self::Team(t) => t.model(),
        }
    }

    fn session_id(&self) -> &str {
        match self {
            Self::Agent(a) => a.session_id(),
            Self::Team(t) => t.session_id(),
        }
    }

    async fn run(
        &self,
        message: &str,
        sink: Option<&mpsc::Sender<RunEvent>>,
    ) -> anyhow::Result<RunResponse> {
        match self {
            Self::Agent(a) => a.run(message, sink).await,
            Self::Team(t) => t.run(message, sink).await,
        }
    }
}

async fn respond(runner: Runner, body: RunRequest) -> Result<Response, ApiError> {
    if body.stream {
        let ctx = ChunkContext::new(runner.model(), runner.session_id());
        let message = body.message;
        let rx = stream_chunks(ctx, move |tx| async move {
            runner.run(&message, Some(&tx)).await
        });
        let events = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|data| (Ok::<_, Infallible>(Event::default().data(data)), rx))
        });
        return Ok(Sse::new(events).into_response());
    }

    let response = runner.run(&body.message, None).await.map_err(|e| {
        error!("Run failed: {e:#}");
        ApiError::Internal(format!("{e:#}"))
    })?;
    Ok(Json(ChatCompletion::from(response)).into_response())
}

pub(crate) async fn list_agents(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.catalog.available_agents())
}

pub(crate) async fn list_teams(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.catalog.available_teams())
}

pub(crate) async fn run_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<RunRequest>,
) -> Result<Response, ApiError> {
    debug!("RunRequest for agent '{agent_id}': {body:?}");
    let agent = state.catalog.get_agent(&agent_id, &body.options())?;
    respond(Runner::Agent(agent), body).await
}

pub(crate) async fn run_team(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    Json(body): Json<RunRequest>,
) -> Result<Response, ApiError> {
    debug!("RunRequest for team '{team_id}': {body:?}");
    let team = state.catalog.get_team(&team_id, &body.options())?;
    respond(Runner::Team(team), body).await
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let server = &state.config().server;
    Json(json!({
        "status": "ok",
        "title": server.title,
        "version": server.version,
    }))
}

pub(crate) async fn docs(State(state): State<AppState>) -> Json<serde_json::Value> {
    let server = &state.config().server;
    let routes: Vec<_> = ROUTES
        .iter()
        .map(|(method, path, summary)| json!({ "method": method, "path": path, "summary": summary }))
        .collect();
    Json(json!({
        "title": server.title,
        "version": server.version,
        "models": SUPPORTED_MODELS,
        "routes": routes,
    }))
}

#[cfg(test)]
mod tests {
    use agentry_config::{Config, ProviderConfig};
    use agentry_core::{Catalog, Database, Runtime};
    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::Router;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::router;

    fn app_with(dir: &TempDir, edit: impl FnOnce(&mut Config)) -> Router {
        let mut config = Config::default();
        config.providers.openai = Some(ProviderConfig {
            api_key: Some("sk-test".into()),
            api_base: None,
        });
        edit(&mut config);
        let db = Database::open(&dir.path().join("api.sqlite")).unwrap();
        router(AppState::new(Catalog::builtin(Runtime::with_database(config, db))))
    }

    fn app(dir: &TempDir) -> Router {
        app_with(dir, |_| {})
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn lists_agents_and_teams() {
        let dir = TempDir::new().unwrap();
        let resp = app(&dir)
            .oneshot(Request::get("/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            json_body(resp).await,
            json!(["hacker_news_agent", "web_agent", "yfinance_agent", "agno_assist"])
        );

        let resp = app(&dir)
            .oneshot(Request::get("/teams").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(resp).await, json!(["hn_team"]));
    }

    #[tokio::test]
    async fn unknown_agent_is_404_with_detail() {
        let dir = TempDir::new().unwrap();
        let resp = app(&dir)
            .oneshot(post_json("/agents/nope/runs", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        let detail = body["detail"].as_str().unwrap();
        assert!(detail.starts_with("Agent 'nope' not found"));
        assert!(detail.contains("web_agent"));
    }

    #[tokio::test]
    async fn unknown_team_is_404_even_when_streaming() {
        let dir = TempDir::new().unwrap();
        let resp = app(&dir)
            .oneshot(post_json(
                "/teams/nope/runs",
                json!({"message": "hi", "stream": true}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(json_body(resp).await["detail"]
            .as_str()
            .unwrap()
            .contains("hn_team"));
    }

    #[tokio::test]
    async fn invalid_model_is_rejected() {
        let dir = TempDir::new().unwrap();
        let resp = app(&dir)
            .oneshot(post_json(
                "/agents/web_agent/runs",
                json!({"message": "hi", "model": "gpt-2"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    /// Chat-completions server that always answers `text`, streamed or not.
    async fn fake_llm(text: &'static str) -> String {
        async fn reply(State(text): State<&'static str>, Json(body): Json<serde_json::Value>) -> Response {
            if body["stream"] == true {
                let chunk = json!({"choices": [{"index": 0, "delta": {"content": text}, "finish_reason": "stop"}]});
                let events = format!("data: {chunk}\n\ndata: [DONE]\n\n");
                return ([(header::CONTENT_TYPE, "text/event-stream")], events).into_response();
            }
            Json(json!({
                "id": "chatcmpl-upstream",
                "object": "chat.completion",
                "created": 0,
                "model": "gpt-4.1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
            }))
            .into_response()
        }

        let app = Router::new()
            .route("/chat/completions", axum::routing::post(reply))
            .with_state(text);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn answering(dir: &TempDir, base: String) -> Router {
        app_with(dir, move |c| {
            if let Some(openai) = c.providers.openai.as_mut() {
                openai.api_base = Some(base);
            }
        })
    }

    #[tokio::test]
    async fn agent_run_returns_a_chat_completion() {
        let dir = TempDir::new().unwrap();
        let app = answering(&dir, fake_llm("answer 1").await);
        let resp = app
            .oneshot(post_json(
                "/agents/web_agent/runs",
                json!({"message": "hi", "stream": false, "session_id": "s-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["session_id"], "s-1");
        assert_eq!(body["choices"][0]["message"]["content"], "answer 1");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn streamed_agent_run_sends_chunks_then_done() {
        let dir = TempDir::new().unwrap();
        let app = answering(&dir, fake_llm("answer 1").await);
        let resp = app
            .oneshot(post_json("/agents/web_agent/runs", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let payloads: Vec<&str> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .collect();
        assert_eq!(payloads.last(), Some(&"[DONE]"));

        let chunks: Vec<serde_json::Value> = payloads[..payloads.len() - 1]
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect();
        assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
        assert!(chunks[0]["session_id"].is_string());
        let deltas: Vec<&str> = chunks
            .iter()
            .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(deltas, vec!["answer 1"]);
        assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn run_request_defaults() {
        let req: RunRequest = serde_json::from_value(json!({"message": "hello"})).unwrap();
        assert!(req.stream);
        assert_eq!(req.model, ModelChoice::Gpt41);
        let opts = req.options();
        assert_eq!(opts.model_id.as_deref(), Some("gpt-4.1"));
        assert!(opts.session_id.is_none());

        let req: RunRequest = serde_json::from_value(
            json!({"message": "x", "stream": false, "model": "o4-mini", "user_id": "ada"}),
        )
        .unwrap();
        assert!(!req.stream);
        assert_eq!(req.options().model_id.as_deref(), Some("o4-mini"));
        assert_eq!(req.options().user_id.as_deref(), Some("ada"));
    }

    #[tokio::test]
    async fn health_and_docs() {
        let dir = TempDir::new().unwrap();
        let resp = app_with(&dir, |c| c.server.title = "Agent API".into())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["title"], "Agent API");

        let resp = app(&dir)
            .oneshot(Request::get("/docs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["routes"].as_array().unwrap().len(), ROUTES.len());
        assert_eq!(body["models"], json!(["gpt-4.1", "o4-mini", "o3"]));

        let resp = app_with(&dir, |c| c.server.docs_enabled = false)
            .oneshot(Request::get("/docs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_wildcard_and_explicit_origins() {
        let dir = TempDir::new().unwrap();
        let request = || {
            Request::get("/health")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(Body::empty())
                .unwrap()
        };

        let resp = app(&dir).oneshot(request()).await.unwrap();
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );

        let resp = app_with(&dir, |c| {
            c.server.cors_origins = vec!["http://localhost:3000".into()]
        })
        .oneshot(request())
        .await
        .unwrap();
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );
    }
}
