//! Scripted stand-in for an OpenAI-compatible `/chat/completions` endpoint.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use agentry_config::{Config, ProviderConfig};

use crate::agent::{build_agent, AgentConfig};
use crate::registry::{AgentRegistration, Runtime};
use crate::storage::Database;

/// One scripted assistant turn.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Text(String),
    Call { name: String, args: Value },
}

impl Reply {
    pub(crate) fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub(crate) fn call(name: &str, args: Value) -> Self {
        Self::Call {
            name: name.to_string(),
            args,
        }
    }
}

struct Script {
    replies: Vec<Reply>,
    requests: Vec<Value>,
}

type Shared = Arc<Mutex<Script>>;

pub(crate) struct FakeLlm {
    addr: SocketAddr,
    script: Shared,
}

impl FakeLlm {
    /// Answer requests with `replies` in order. The last reply repeats once the script runs out.
    pub(crate) async fn start(replies: Vec<Reply>) -> Self {
        assert!(!replies.is_empty());
        let script = Arc::new(Mutex::new(Script {
            replies,
            requests: Vec::new(),
        }));
        let app = Router::new()
            .route("/chat/completions", post(chat_completions))
            .with_state(script.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, script }
    }

    /// Request bodies received so far, oldest first.
    pub(crate) fn requests(&self) -> Vec<Value> {
        self.script.lock().unwrap().requests.clone()
    }

    /// Default config with the OpenAI provider pointed here.
    pub(crate) fn config(&self) -> Config {
        let mut config = Config::default();
        config.providers.openai = Some(ProviderConfig {
            api_key: Some("sk-test".into()),
            api_base: Some(format!("http://{}", self.addr)),
        });
        config
    }

    pub(crate) fn runtime(&self) -> Runtime {
        self.runtime_with(|_| {})
    }

    pub(crate) fn runtime_with(&self, edit: impl FnOnce(&mut Config)) -> Runtime {
        let mut config = self.config();
        edit(&mut config);
        Runtime::with_database(config, Database::open_in_memory().unwrap())
    }
}

/// A tool-less persona (apart from chat history) for run tests.
pub(crate) fn persona(id: &str, edit: impl FnOnce(&mut AgentConfig)) -> AgentRegistration {
    let mut config = AgentConfig {
        agent_id: id.into(),
        name: id.to_uppercase(),
        description: format!("{id} answers questions."),
        ..Default::default()
    };
    edit(&mut config);
    AgentRegistration::new(config, build_agent)
}

async fn chat_completions(State(script): State<Shared>, Json(body): Json<Value>) -> Response {
    let (turn, reply) = {
        let mut script = script.lock().unwrap();
        let turn = script.requests.len();
        script.requests.push(body.clone());
        let last = script.replies.len() - 1;
        (turn, script.replies[turn.min(last)].clone())
    };
    let call_id = format!("call_{turn}");
    if body["stream"] == true {
        event_stream(&reply, &call_id)
    } else {
        Json(completion(&reply, &call_id)).into_response()
    }
}

fn completion(reply: &Reply, call_id: &str) -> Value {
    let (message, finish_reason) = match reply {
        Reply::Text(text) => (json!({"role": "assistant", "content": text}), "stop"),
        Reply::Call { name, args } => (
            json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "id": call_id,
                    "type": "function",
                    "function": {"name": name, "arguments": args.to_string()}
                }]
            }),
            "tool_calls",
        ),
    };
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 0,
        "model": "gpt-4.1",
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    })
}

fn event_stream(reply: &Reply, call_id: &str) -> Response {
    let (delta, finish_reason) = match reply {
        Reply::Text(text) => (json!({"content": text}), "stop"),
        Reply::Call { name, args } => (
            json!({
                "tool_calls": [{
                    "index": 0,
                    "id": call_id,
                    "function": {"name": name, "arguments": args.to_string()}
                }]
            }),
            "tool_calls",
        ),
    };
    let chunks = [
        json!({"choices": [{"index": 0, "delta": delta, "finish_reason": null}]}),
        json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": finish_reason}],
            "usage": {"prompt_tokens": 1, "total_tokens": 2}
        }),
    ];
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}
