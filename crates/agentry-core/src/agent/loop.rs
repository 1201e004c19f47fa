use anyhow::Result;
use futures::StreamExt;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest, Message};
use rig::message::{AssistantContent, Text, ToolCall, ToolResult, ToolResultContent, UserContent};
use rig::streaming::StreamedAssistantContent;
use rig::OneOrMany;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::RunEvent;
use crate::model::ModelOverrides;
use crate::tools::ToolRegistry;

const MAX_CONSECUTIVE_ERRORS: usize = 3;
const CONTINUE_PROMPT: &str = "Call more tools if you still need data. Otherwise, answer the request.";

/// Find the largest byte index <= `max` that is a UTF-8 char boundary.
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

pub(crate) fn preview(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}... ({} chars)", &s[..floor_char_boundary(s, max)], s.len())
    } else {
        s.to_string()
    }
}

/// Forward an event to the caller. A closed receiver means the client went away.
pub(crate) async fn emit(sink: Option<&mpsc::Sender<RunEvent>>, event: RunEvent) {
    if let Some(tx) = sink {
        if tx.send(event).await.is_err() {
            debug!("Run event receiver closed");
        }
    }
}

/// Render a tool call the way it is shown to users: `name(key=value, ...)`.
pub(crate) fn format_tool_call(name: &str, args: &serde_json::Value) -> String {
    let rendered = match args.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| match v.as_str() {
                Some(s) => format!("{k}={s}"),
                None => format!("{k}={v}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        None if args.is_null() => String::new(),
        None => args.to_string(),
    };
    format!("{name}({rendered})")
}

pub(crate) fn user_text(text: impl Into<String>) -> Message {
    Message::User {
        content: OneOrMany::one(UserContent::Text(Text { text: text.into() })),
    }
}

pub(crate) fn assistant_text(text: impl Into<String>) -> Message {
    Message::Assistant {
        id: None,
        content: OneOrMany::one(AssistantContent::Text(Text { text: text.into() })),
    }
}

pub struct LoopOutput {
    pub content: String,
    pub tools_used: Vec<String>,
}

/// LLM <> tool dispatch loop shared by agents and team leaders.
#[allow(deprecated)]
pub struct ToolLoop<'a> {
    pub model: &'a CompletionModelHandle<'static>,
    pub model_name: &'a str,
    pub tools: &'a ToolRegistry,
    pub max_iterations: usize,
    pub temperature: Option<f64>,
    pub max_tokens: u64,
    pub overrides: &'a ModelOverrides,
    pub show_tool_calls: bool,
    /// Log tool traffic at info instead of debug.
    pub verbose: bool,
}

struct Step {
    text: String,
    tool_calls: Vec<ToolCall>,
    choice: OneOrMany<AssistantContent>,
}

impl ToolLoop<'_> {
    fn trace(&self, msg: String) {
        if self.verbose {
            info!("{msg}");
        } else {
            debug!("{msg}");
        }
    }

    /// Run until the model answers without tool calls or `max_iterations` is reached.
    ///
    /// With a sink, completions are streamed and text deltas are forwarded as they arrive.
    pub async fn run(
        &self,
        system_prompt: &str,
        mut chat_history: Vec<Message>,
        prompt: Message,
        sink: Option<&mpsc::Sender<RunEvent>>,
    ) -> Result<LoopOutput> {
        let (temperature, max_tokens) =
            self.overrides
                .resolve(self.model_name, self.temperature, self.max_tokens);
        let tool_defs = self.tools.definitions();
        let mut content = String::new();
        let mut tools_used = Vec::new();
        let mut current_prompt = prompt;
        let mut consecutive_errors = 0usize;

        for iteration in 0..self.max_iterations {
            let mut all_messages = chat_history.clone();
            all_messages.push(current_prompt.clone());

            self.trace(format!(
                "LLM request [{}/{}]: model={}, {} messages, {} tools",
                iteration + 1,
                self.max_iterations,
                self.model_name,
                all_messages.len(),
                tool_defs.len()
            ));

            let request = CompletionRequest {
                preamble: Some(system_prompt.to_string()),
                chat_history: OneOrMany::many(all_messages)
                    .unwrap_or_else(|_| OneOrMany::one(current_prompt.clone())),
                documents: Vec::new(),
                tools: tool_defs.clone(),
                temperature,
                max_tokens: Some(max_tokens),
                tool_choice: None,
                additional_params: None,
            };

            let started = std::time::Instant::now();
            let step = self.complete(request, sink).await?;
            content.push_str(&step.text);

            if step.tool_calls.is_empty() {
                self.trace(format!(
                    "LLM response [{}/{}]: text ({} chars) in {:.1}s",
                    iteration + 1,
                    self.max_iterations,
                    step.text.len(),
                    started.elapsed().as_secs_f64()
                ));
                if content.trim().is_empty() {
                    content = "I've completed processing but have no response to give.".into();
                    emit(sink, RunEvent::Content(content.clone())).await;
                }
                return Ok(LoopOutput {
                    content,
                    tools_used,
                });
            }

            self.trace(format!(
                "LLM response [{}/{}]: {} tool call(s) in {:.1}s",
                iteration + 1,
                self.max_iterations,
                step.tool_calls.len(),
                started.elapsed().as_secs_f64()
            ));

            if self.show_tool_calls {
                let mut block = String::from(if content.is_empty() { "" } else { "\n\n" });
                block.push_str("Running:\n");
                for tc in &step.tool_calls {
                    block.push_str(&format!(
                        " - {}\n",
                        format_tool_call(&tc.function.name, &tc.function.arguments)
                    ));
                }
                block.push('\n');
                content.push_str(&block);
                emit(sink, RunEvent::Content(block)).await;
            }

            chat_history.push(current_prompt);
            chat_history.push(Message::Assistant {
                id: None,
                content: step.choice,
            });

            let mut tool_results: Vec<UserContent> = Vec::new();
            let mut any_success = false;
            let mut last_error = String::new();
            for tc in &step.tool_calls {
                let name = &tc.function.name;
                let args = &tc.function.arguments;
                tools_used.push(name.clone());
                self.trace(format!(
                    "Tool call [{}/{}]: {name}({})",
                    iteration + 1,
                    self.max_iterations,
                    preview(&args.to_string(), 200)
                ));
                emit(
                    sink,
                    RunEvent::ToolCall {
                        name: name.clone(),
                        arguments: args.clone(),
                    },
                )
                .await;

                let result = match self.tools.execute(name, args.clone()).await {
                    Ok(r) if r.starts_with("Error") => {
                        last_error.clone_from(&r);
                        r
                    }
                    Ok(r) => {
                        any_success = true;
                        r
                    }
                    Err(e) => {
                        let err = format!("Error executing {name}: {e:#}");
                        last_error.clone_from(&err);
                        err
                    }
                };
                self.trace(format!("Tool result [{name}]: {}", preview(&result, 200)));
                emit(
                    sink,
                    RunEvent::ToolResult {
                        name: name.clone(),
                        preview: preview(&result, 200),
                    },
                )
                .await;

                tool_results.push(UserContent::ToolResult(ToolResult {
                    id: tc.id.clone(),
                    call_id: tc.call_id.clone(),
                    content: OneOrMany::one(ToolResultContent::Text(Text { text: result })),
                }));
            }

            if any_success {
                consecutive_errors = 0;
            } else {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!(
                        "Circuit breaker: {consecutive_errors} consecutive iterations with all tool calls failing"
                    );
                    let msg = format!(
                        "I'm having trouble using a tool correctly and had to stop retrying. \
                         Last error: {last_error}. Could you try rephrasing your request?"
                    );
                    emit(sink, RunEvent::Content(msg.clone())).await;
                    content.push_str(&msg);
                    return Ok(LoopOutput {
                        content,
                        tools_used,
                    });
                }
            }

            tool_results.push(UserContent::Text(Text {
                text: CONTINUE_PROMPT.into(),
            }));
            current_prompt = Message::User {
                content: OneOrMany::many(tool_results)
                    .unwrap_or_else(|_| OneOrMany::one(UserContent::Text(Text {
                        text: CONTINUE_PROMPT.into(),
                    }))),
            };
        }

        warn!(
            "Tool loop reached max iterations ({}) without final response",
            self.max_iterations
        );
        let msg = "I've been working on this but reached the maximum number of iterations. Here's what I've done so far.";
        emit(sink, RunEvent::Content(msg.to_string())).await;
        content.push_str(msg);
        Ok(LoopOutput {
            content,
            tools_used,
        })
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        sink: Option<&mpsc::Sender<RunEvent>>,
    ) -> Result<Step> {
        let choice = match sink {
            None => {
                self.model
                    .completion(request)
                    .await
                    .map_err(|e| anyhow::anyhow!("LLM completion error: {e}"))?
                    .choice
            }
            Some(_) => {
                let mut stream = self
                    .model
                    .stream(request)
                    .await
                    .map_err(|e| anyhow::anyhow!("LLM stream error: {e}"))?;
                let mut streamed = String::new();
                while let Some(item) = stream.next().await {
                    let item = item.map_err(|e| anyhow::anyhow!("LLM stream error: {e}"))?;
                    if let StreamedAssistantContent::Text(t) = item {
                        streamed.push_str(&t.text);
                        emit(sink, RunEvent::Content(t.text)).await;
                    }
                }
                let tool_calls = collect_tool_calls(&stream.choice);
                return Ok(Step {
                    text: streamed,
                    tool_calls,
                    choice: stream.choice.clone(),
                });
            }
        };

        let text: String = choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect();
        if !text.is_empty() {
            emit(sink, RunEvent::Content(text.clone())).await;
        }
        Ok(Step {
            text,
            tool_calls: collect_tool_calls(&choice),
            choice,
        })
    }
}

fn collect_tool_calls(choice: &OneOrMany<AssistantContent>) -> Vec<ToolCall> {
    choice
        .iter()
        .filter_map(|c| match c {
            AssistantContent::ToolCall(tc) => Some(tc.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_rendering() {
        assert_eq!(
            format_tool_call(
                "get_top_hackernews_stories",
                &serde_json::json!({"num_stories": 5})
            ),
            "get_top_hackernews_stories(num_stories=5)"
        );
        assert_eq!(
            format_tool_call("duckduckgo_search", &serde_json::json!({"query": "rust 2024"})),
            "duckduckgo_search(query=rust 2024)"
        );
        assert_eq!(
            format_tool_call("clear_user_memories", &serde_json::Value::Null),
            "clear_user_memories()"
        );
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let s = "é".repeat(150);
        let p = preview(&s, 201);
        assert!(p.ends_with("(300 chars)"));
        assert!(p.starts_with(&"é".repeat(100)));
        assert_eq!(preview("short", 200), "short");
    }

    #[tokio::test]
    async fn emit_ignores_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        emit(Some(&tx), RunEvent::Content("x".into())).await;
        emit(None, RunEvent::Content("y".into())).await;
    }
}
