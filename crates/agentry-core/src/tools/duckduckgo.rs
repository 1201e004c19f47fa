use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use super::{int_param, str_param, Tool, ToolDeps, ToolsetConfig, USER_AGENT};

pub const CONFIG: ToolsetConfig = ToolsetConfig {
    tool_id: "duckduckgo_tools",
    name: "DuckDuckGo Tools",
    description: "Web and news search through DuckDuckGo.",
};

pub fn build(deps: &ToolDeps) -> Result<Vec<Box<dyn Tool>>> {
    let search = Arc::new(DdgSearch {
        http: deps.http.clone(),
        url: deps.settings.web.search_url.clone(),
        max_results: deps.settings.web.max_results.max(1),
        timeout: deps.timeout(),
        parser: ResultParser::new()?,
    });
    Ok(vec![
        Box::new(DuckDuckGoTool {
            search: search.clone(),
            kind: SearchKind::Web,
        }),
        Box::new(DuckDuckGoTool {
            search,
            kind: SearchKind::News,
        }),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

struct ResultParser {
    link_re: Regex,
    href_re: Regex,
    snippet_re: Regex,
    tag_re: Regex,
    spaces_re: Regex,
}

impl ResultParser {
    fn new() -> Result<Self> {
        Ok(Self {
            link_re: Regex::new(r#"(?is)<a([^>]*class="[^"]*result__a[^"]*"[^>]*)>(.*?)</a>"#)?,
            href_re: Regex::new(r#"(?i)href="([^"]+)""#)?,
            snippet_re: Regex::new(
                r#"(?is)<(a|div|td)[^>]*class="[^"]*result__snippet[^"]*"[^>]*>(.*?)</(?:a|div|td)>"#,
            )?,
            tag_re: Regex::new(r"<[^>]+>")?,
            spaces_re: Regex::new(r"\s+")?,
        })
    }

    fn clean(&self, html: &str) -> String {
        let text = self.tag_re.replace_all(html, "");
        let text = html_escape::decode_html_entities(&text);
        self.spaces_re.replace_all(&text, " ").trim().to_string()
    }

    /// Extract `{title, href, body}` triples from a DuckDuckGo HTML result page.
    ///
    /// A result's snippet is the first one between its link and the next result link.
    fn parse(&self, html: &str, limit: usize) -> Vec<SearchResult> {
        let links: Vec<_> = self.link_re.captures_iter(html).collect();
        let mut results = Vec::new();
        for (i, caps) in links.iter().enumerate() {
            if results.len() >= limit {
                break;
            }
            let Some(href) = self.href_re.captures(&caps[1]) else {
                continue;
            };
            let href = decode_redirect(&html_escape::decode_html_entities(&href[1]));
            // Sponsored results link back into duckduckgo.com.
            if href.is_empty() || href.contains("duckduckgo.com/y.js") {
                continue;
            }
            let title = self.clean(&caps[2]);
            if title.is_empty() {
                continue;
            }

            let start = caps.get(0).map_or(0, |m| m.end());
            let end = links
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(html.len(), |m| m.start());
            let body = self
                .snippet_re
                .captures(&html[start..end])
                .map(|c| self.clean(&c[2]))
                .unwrap_or_default();

            results.push(SearchResult { title, href, body });
        }
        results
    }
}

/// Resolve DuckDuckGo's `/l/?uddg=<target>` redirect links to the target URL.
fn decode_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    match url::Url::parse(&absolute) {
        Ok(parsed) if parsed.path().starts_with("/l/") => parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())
            .unwrap_or(absolute),
        _ => absolute,
    }
}

struct DdgSearch {
    http: reqwest::Client,
    url: String,
    max_results: u32,
    timeout: std::time::Duration,
    parser: ResultParser,
}

impl DdgSearch {
    async fn run(&self, query: &str, news: bool, limit: usize) -> Result<Vec<SearchResult>> {
        let mut form = vec![("q", query.to_string()), ("kl", "wt-wt".to_string())];
        if news {
            form.push(("iar", "news".to_string()));
            form.push(("ia", "news".to_string()));
        }
        let resp = self
            .http
            .post(&self.url)
            .header("User-Agent", USER_AGENT)
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("DuckDuckGo request for '{query}' failed"))?;
        resp.error_for_status_ref()
            .map_err(|e| anyhow::anyhow!("DuckDuckGo error: {e}"))?;
        let html = resp.text().await?;
        Ok(self.parser.parse(&html, limit))
    }
}

#[derive(Clone, Copy)]
enum SearchKind {
    Web,
    News,
}

struct DuckDuckGoTool {
    search: Arc<DdgSearch>,
    kind: SearchKind,
}

#[async_trait]
impl Tool for DuckDuckGoTool {
    fn name(&self) -> &str {
        match self.kind {
            SearchKind::Web => "duckduckgo_search",
            SearchKind::News => "duckduckgo_news",
        }
    }

    fn description(&self) -> &str {
        match self.kind {
            SearchKind::Web => "Search DuckDuckGo for a query. Returns a JSON list of {title, href, body}.",
            SearchKind::News => {
                "Get the latest news from DuckDuckGo for a query. Returns a JSON list of {title, href, body}."
            }
        }
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The query to search for"},
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5)",
                    "minimum": 1,
                    "maximum": 25
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let query = str_param(&params, "query");
        if query.is_empty() {
            return Ok("Error: query is required".into());
        }
        let limit = int_param(
            &params,
            "max_results",
            self.search.max_results as u64,
            1,
            25,
        ) as usize;
        let news = matches!(self.kind, SearchKind::News);
        let results = self.search.run(query, news, limit).await?;
        Ok(serde_json::to_string(&results)?)
    }
}
