use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;

use super::{int_param, str_param, Tool, ToolDeps, ToolsetConfig};

pub const CONFIG: ToolsetConfig = ToolsetConfig {
    tool_id: "hacker_news_tools",
    name: "HackerNews Tools",
    description: "Utilities for interacting with the Hacker News API.",
};

pub fn build(deps: &ToolDeps) -> Result<Vec<Box<dyn Tool>>> {
    let client = HnClient {
        http: deps.http.clone(),
        base: deps.settings.hackernews.api_base.trim_end_matches('/').to_string(),
        timeout: deps.timeout(),
    };
    Ok(vec![
        Box::new(TopStoriesTool {
            client: client.clone(),
        }),
        Box::new(UserDetailsTool { client }),
    ])
}

#[derive(Clone)]
struct HnClient {
    http: reqwest::Client,
    base: String,
    timeout: std::time::Duration,
}

impl HnClient {
    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}/{path}", self.base);
        let resp = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        resp.error_for_status_ref()
            .map_err(|e| anyhow::anyhow!("Hacker News API error: {e}"))?;
        Ok(resp.json().await?)
    }

    async fn item(&self, id: u64) -> Result<serde_json::Value> {
        let mut story = self.get_json(&format!("item/{id}.json")).await?;
        // The body text is large and rarely needed for summaries.
        if let Some(obj) = story.as_object_mut() {
            obj.remove("text");
        }
        Ok(story)
    }
}

/// Returns the current top stories as a JSON array.
struct TopStoriesTool {
    client: HnClient,
}

#[async_trait]
impl Tool for TopStoriesTool {
    fn name(&self) -> &str {
        "get_top_hackernews_stories"
    }

    fn description(&self) -> &str {
        "Get the top stories from Hacker News as a JSON list of story objects."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "num_stories": {
                    "type": "integer",
                    "description": "Number of stories to return (default 10)",
                    "minimum": 1,
                    "maximum": 100
                }
            }
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let num = int_param(&params, "num_stories", 10, 1, 100) as usize;
        let ids: Vec<u64> = serde_json::from_value(self.client.get_json("topstories.json").await?)
            .context("unexpected topstories payload")?;
        debug!("Fetching {} of {} top stories", num.min(ids.len()), ids.len());

        let stories = try_join_all(ids.iter().take(num).map(|id| self.client.item(*id))).await?;
        Ok(serde_json::to_string(&stories)?)
    }
}

/// Profile summary for a Hacker News user.
struct UserDetailsTool {
    client: HnClient,
}

#[async_trait]
impl Tool for UserDetailsTool {
    fn name(&self) -> &str {
        "get_user_details"
    }

    fn description(&self) -> &str {
        "Get the details of a Hacker News user by username."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "username": {"type": "string", "description": "Hacker News username"}
            },
            "required": ["username"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let username = str_param(&params, "username");
        if username.is_empty() {
            return Ok("Error: username is required".into());
        }
        let user = self
            .client
            .get_json(&format!("user/{username}.json"))
            .await?;
        if user.is_null() {
            return Ok(format!("Error: user '{username}' not found"));
        }
        let details = serde_json::json!({
            "id": user.get("id").cloned().unwrap_or_else(|| username.into()),
            "karma": user.get("karma").cloned().unwrap_or(serde_json::Value::Null),
            "about": user.get("about").cloned().unwrap_or(serde_json::Value::Null),
            "total_items_submitted": user
                .get("submitted")
                .and_then(|s| s.as_array())
                .map(|s| s.len())
                .unwrap_or(0),
        });
        Ok(details.to_string())
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::Path;
    use axum::routing::get;
    use axum::{Json, Router};

    use agentry_config::ToolsConfig;

    use super::*;

    async fn top_stories() -> Json<Vec<u64>> {
        Json(vec![101, 102, 103, 104])
    }

    async fn item(Path(file): Path<String>) -> Json<serde_json::Value> {
        let id: u64 = file.trim_end_matches(".json").parse().unwrap();
        Json(serde_json::json!({
            "id": id,
            "type": "story",
            "title": format!("Story {id}"),
            "score": id * 2,
            "text": "x".repeat(5000),
        }))
    }

    async fn user(Path(file): Path<String>) -> Json<serde_json::Value> {
        match file.trim_end_matches(".json") {
            "pg" => Json(serde_json::json!({
                "id": "pg",
                "karma": 155000,
                "about": "Bug fixer.",
                "submitted": [1, 2, 3],
            })),
            _ => Json(serde_json::Value::Null),
        }
    }

    async fn mock_deps() -> ToolDeps {
        let app = Router::new()
            .route("/v0/topstories.json", get(top_stories))
            .route("/v0/item/{file}", get(item))
            .route("/v0/user/{file}", get(user));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut settings = ToolsConfig::default();
        settings.hackernews.api_base = format!("http://{addr}/v0");
        ToolDeps::new(reqwest::Client::new(), settings)
    }

    fn tool<'a>(tools: &'a [Box<dyn Tool>], name: &str) -> &'a dyn Tool {
        tools.iter().find(|t| t.name() == name).unwrap().as_ref()
    }

    #[tokio::test]
    async fn top_stories_respects_limit_and_strips_text() {
        let tools = build(&mock_deps().await).unwrap();
        let out = tool(&tools, "get_top_hackernews_stories")
            .execute(serde_json::json!({"num_stories": 2}))
            .await
            .unwrap();
        let stories: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[0]["id"], 101);
        assert_eq!(stories[1]["title"], "Story 102");
        assert!(stories.iter().all(|s| s.get("text").is_none()));
    }

    #[tokio::test]
    async fn top_stories_never_exceeds_available() {
        let tools = build(&mock_deps().await).unwrap();
        let out = tool(&tools, "get_top_hackernews_stories")
            .execute(serde_json::json!({"num_stories": 50}))
            .await
            .unwrap();
        let stories: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(stories.len(), 4);
    }

    #[tokio::test]
    async fn user_details_summarises_submissions() {
        let tools = build(&mock_deps().await).unwrap();
        let details = tool(&tools, "get_user_details");

        let out = details
            .execute(serde_json::json!({"username": "pg"}))
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["karma"], 155000);
        assert_eq!(v["total_items_submitted"], 3);

        let missing = details
            .execute(serde_json::json!({"username": "ghost"}))
            .await
            .unwrap();
        assert!(missing.contains("not found"));
    }

    #[tokio::test]
    async fn unreachable_api_is_an_error() {
        let mut settings = ToolsConfig::default();
        settings.hackernews.api_base = "http://127.0.0.1:1/v0".into();
        settings.timeout_secs = 2;
        let tools = build(&ToolDeps::new(reqwest::Client::new(), settings)).unwrap();
        let result = tool(&tools, "get_top_hackernews_stories")
            .execute(serde_json::json!({}))
            .await;
        assert!(result.is_err());
    }
}
