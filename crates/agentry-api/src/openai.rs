//! OpenAI chat-completion shaped response bodies.

use std::future::Future;

use agentry_core::{RunEvent, RunResponse};
use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

pub const DONE: &str = "[DONE]";

#[derive(Debug, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub member_responses: Vec<RunResponse>,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

impl From<RunResponse> for ChatCompletion {
    fn from(r: RunResponse) -> Self {
        Self {
            id: format!("chatcmpl-{}", r.run_id),
            object: "chat.completion",
            created: r.created_at.timestamp(),
            model: r.model,
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant",
                    content: r.content,
                },
                finish_reason: "stop",
            }],
            session_id: r.session_id,
            tools_used: r.tools_used,
            member_responses: r.member_responses,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ChunkError>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Default, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChunkError {
    pub message: String,
}

/// Identity shared by every chunk of one streamed run.
#[derive(Debug, Clone)]
pub struct ChunkContext {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub session_id: String,
}

impl ChunkContext {
    pub fn new(model: &str, session_id: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            session_id: session_id.to_string(),
        }
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<&'static str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            session_id: None,
            error: None,
        }
    }

    pub fn role(&self) -> ChatCompletionChunk {
        let mut chunk = self.chunk(
            Delta {
                role: Some("assistant"),
                content: Some(String::new()),
            },
            None,
        );
        chunk.session_id = Some(self.session_id.clone());
        chunk
    }

    pub fn content(&self, text: String) -> ChatCompletionChunk {
        self.chunk(
            Delta {
                role: None,
                content: Some(text),
            },
            None,
        )
    }

    pub fn stop(&self) -> ChatCompletionChunk {
        self.chunk(Delta::default(), Some("stop"))
    }

    pub fn error(&self, message: String) -> ChatCompletionChunk {
        let mut chunk = self.chunk(Delta::default(), Some("error"));
        chunk.error = Some(ChunkError { message });
        chunk
    }
}

fn encode(chunk: &ChatCompletionChunk) -> String {
    serde_json::to_string(chunk).unwrap_or_else(|e| {
        error!("Failed to encode chunk: {e}");
        String::from("{}")
    })
}

/// Drive `run` and turn its events into SSE `data:` payloads.
///
/// Yields a role chunk, one chunk per content delta, then a stop chunk (or an
/// error chunk when the run fails) and finally `[DONE]`.
pub fn stream_chunks<F, Fut>(ctx: ChunkContext, run: F) -> mpsc::Receiver<String>
where
    F: FnOnce(mpsc::Sender<RunEvent>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<RunResponse>> + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel::<String>(64);
    tokio::spawn(async move {
        let send = |payload: String| {
            let out_tx = out_tx.clone();
            async move {
                if out_tx.send(payload).await.is_err() {
                    debug!("SSE client disconnected");
                }
            }
        };
        send(encode(&ctx.role())).await;

        let (tx, mut rx) = mpsc::channel::<RunEvent>(64);
        let producer = run(tx);
        let consumer = async {
            while let Some(event) = rx.recv().await {
                if let RunEvent::Content(text) = event {
                    if !text.is_empty() {
                        send(encode(&ctx.content(text))).await;
                    }
                }
            }
        };
        let (result, ()) = tokio::join!(producer, consumer);

        match result {
            Ok(_) => send(encode(&ctx.stop())).await,
            Err(e) => {
                error!("Streamed run failed: {e:#}");
                send(encode(&ctx.error(format!("{e:#}")))).await;
            }
        }
        send(DONE.to_string()).await;
    });
    out_rx
}
