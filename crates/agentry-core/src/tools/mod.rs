pub mod duckduckgo;
pub mod hackernews;
pub mod history;
pub mod knowledge;
pub mod memory;
pub mod yfinance;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::ToolDefinition;
use serde_json::Value;

use agentry_config::ToolsConfig;

pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Trait for tools callable by the LLM agent.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value) -> Result<String>;
}

/// The tools bound to a single agent or team leader.
///
/// Registration order is kept so the model sees tools in a stable order.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. A later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn extend(&mut self, tools: impl IntoIterator<Item = Box<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions in rig's function-calling format.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, params: Value) -> Result<String> {
        match self.tools.get(name) {
            Some(tool) => {
                let errors = schema_violations(&params, &tool.parameters_schema());
                if !errors.is_empty() {
                    return Ok(format!(
                        "Error: Invalid parameters for tool '{}': {}",
                        name,
                        errors.join("; ")
                    ));
                }
                tool.execute(params).await
            }
            None => anyhow::bail!("unknown tool: {name}"),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared resources handed to tool-set builders.
#[derive(Clone)]
pub struct ToolDeps {
    pub http: reqwest::Client,
    pub settings: ToolsConfig,
}

impl ToolDeps {
    pub fn new(http: reqwest::Client, settings: ToolsConfig) -> Self {
        Self { http, settings }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs.max(1))
    }
}

/// Static description of a tool set.
#[derive(Debug, Clone)]
pub struct ToolsetConfig {
    pub tool_id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub type ToolsetFactory = fn(&ToolDeps) -> Result<Vec<Box<dyn Tool>>>;

/// A tool set plus the function that instantiates its tools.
#[derive(Clone)]
pub struct ToolsetRegistration {
    pub config: ToolsetConfig,
    pub build: ToolsetFactory,
}

/// Built-in tool sets, in registration order.
pub fn builtin() -> Vec<ToolsetRegistration> {
    vec![
        ToolsetRegistration {
            config: hackernews::CONFIG,
            build: hackernews::build,
        },
        ToolsetRegistration {
            config: duckduckgo::CONFIG,
            build: duckduckgo::build,
        },
        ToolsetRegistration {
            config: yfinance::CONFIG,
            build: yfinance::build,
        },
    ]
}

/// Read an integer parameter, clamped to `[min, max]`.
pub(crate) fn int_param(params: &Value, key: &str, default: u64, min: u64, max: u64) -> u64 {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .unwrap_or(default)
        .clamp(min, max)
}

pub(crate) fn str_param<'a>(params: &'a Value, key: &str) -> &'a str {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("")
}

/// Everything wrong with `params` under a tool's JSON schema, one line each.
///
/// Covers the keywords tool schemas use: `type`, `enum`, `required`,
/// `properties`, `items`, numeric bounds and string lengths.
fn schema_violations(params: &Value, schema: &Value) -> Vec<String> {
    let mut found = Vec::new();
    check(params, schema, "", &mut found);
    found
}

fn has_type(value: &Value, kind: &str) -> bool {
    match kind {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn field_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn check(value: &Value, schema: &Value, at: &str, found: &mut Vec<String>) {
    let here = if at.is_empty() { "params" } else { at };
    let number = |key: &str| schema.get(key).and_then(Value::as_f64);

    if let Some(kind) = schema.get("type").and_then(Value::as_str) {
        if !has_type(value, kind) {
            found.push(format!("{here} must be of type {kind}"));
            return;
        }
    }
    if let Some(choices) = schema.get("enum").and_then(Value::as_array) {
        if !choices.contains(value) {
            let listed: Vec<String> = choices.iter().map(Value::to_string).collect();
            found.push(format!("{here} must be one of {}", listed.join(", ")));
        }
    }

    match value {
        Value::Number(n) => {
            let n = n.as_f64().unwrap_or_default();
            if let Some(min) = number("minimum").filter(|min| n < *min) {
                found.push(format!("{here} must be at least {min}"));
            }
            if let Some(max) = number("maximum").filter(|max| n > *max) {
                found.push(format!("{here} must be at most {max}"));
            }
        }
        Value::String(s) => {
            let chars = s.chars().count() as f64;
            if let Some(min) = number("minLength").filter(|min| chars < *min) {
                found.push(format!("{here} must have at least {min} characters"));
            }
            if let Some(max) = number("maxLength").filter(|max| chars > *max) {
                found.push(format!("{here} must have at most {max} characters"));
            }
        }
        Value::Object(fields) => {
            let required = schema.get("required").and_then(Value::as_array);
            for key in required.into_iter().flatten().filter_map(Value::as_str) {
                if !fields.contains_key(key) {
                    found.push(format!("{} is required", field_path(at, key)));
                }
            }
            let properties = schema.get("properties").and_then(Value::as_object);
            for (key, sub) in properties.into_iter().flatten() {
                if let Some(field) = fields.get(key) {
                    check(field, sub, &field_path(at, key), found);
                }
            }
        }
        Value::Array(items) => {
            if let Some(sub) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check(item, sub, &format!("{here}[{i}]"), found);
                }
            }
        }
        _ => {}
    }
}
