use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use url::Url;

use super::{int_param, str_param, Tool, ToolDeps, ToolsetConfig, USER_AGENT};

pub const CONFIG: ToolsetConfig = ToolsetConfig {
    tool_id: "yfinance_tools",
    name: "YFinance Tools",
    description: "Stock prices, price history and company news from Yahoo Finance.",
};

const PERIODS: &[&str] = &[
    "1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max",
];
const INTERVALS: &[&str] = &[
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
];

pub fn build(deps: &ToolDeps) -> Result<Vec<Box<dyn Tool>>> {
    let client = YahooClient {
        http: deps.http.clone(),
        base: deps.settings.finance.api_base.trim_end_matches('/').to_string(),
        timeout: deps.timeout(),
    };
    Ok(vec![
        Box::new(CurrentPriceTool {
            client: client.clone(),
        }),
        Box::new(HistoricalPricesTool {
            client: client.clone(),
        }),
        Box::new(CompanyNewsTool { client }),
    ])
}

#[derive(Clone)]
struct YahooClient {
    http: reqwest::Client,
    base: String,
    timeout: std::time::Duration,
}

impl YahooClient {
    /// GET `base/segments...`. Each segment is percent-encoded on its own.
    async fn get(&self, segments: &[&str], query: &[(&str, String)]) -> Result<serde_json::Value> {
        let mut url = Url::parse(&self.base)
            .with_context(|| format!("invalid finance API base '{}'", self.base))?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("finance API base '{}' cannot carry a path", self.base))?
            .pop_if_empty()
            .extend(segments);
        let resp = self
            .http
            .get(url.clone())
            .query(query)
            .header("User-Agent", USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        // Yahoo reports unknown symbols as 404 with a JSON error body.
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("Yahoo Finance returned {status} with a non-JSON body"))?;
        Ok(body)
    }

    /// First `chart.result` entry, or the API's error description.
    async fn chart(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<std::result::Result<serde_json::Value, String>> {
        let body = self
            .get(
                &["v8", "finance", "chart", symbol],
                &[("range", range.to_string()), ("interval", interval.to_string())],
            )
            .await?;
        let chart = &body["chart"];
        if let Some(desc) = chart["error"]["description"].as_str() {
            return Ok(Err(desc.to_string()));
        }
        match chart["result"].get(0) {
            Some(result) => Ok(Ok(result.clone())),
            None => Ok(Err(format!("no data found for symbol '{symbol}'"))),
        }
    }
}

fn symbol_param(params: &serde_json::Value) -> Option<String> {
    let symbol = str_param(params, "symbol");
    if symbol.is_empty() {
        None
    } else {
        Some(symbol.to_uppercase())
    }
}

fn symbol_schema(extra: serde_json::Value) -> serde_json::Value {
    let mut properties = serde_json::json!({
        "symbol": {"type": "string", "description": "Stock ticker symbol, e.g. NVDA"}
    });
    if let (Some(props), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        props.extend(extra.clone());
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": ["symbol"]
    })
}

struct CurrentPriceTool {
    client: YahooClient,
}

#[async_trait]
impl Tool for CurrentPriceTool {
    fn name(&self) -> &str {
        "get_current_stock_price"
    }

    fn description(&self) -> &str {
        "Get the current stock price for a ticker symbol."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        symbol_schema(serde_json::json!({}))
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let Some(symbol) = symbol_param(&params) else {
            return Ok("Error: symbol is required".into());
        };
        let result = match self.client.chart(&symbol, "1d", "1d").await? {
            Ok(r) => r,
            Err(e) => return Ok(format!("Error fetching current price for {symbol}: {e}")),
        };
        let meta = &result["meta"];
        match meta["regularMarketPrice"].as_f64() {
            Some(price) => {
                let currency = meta["currency"].as_str().unwrap_or("USD");
                Ok(format!("{price:.4} {currency}"))
            }
            None => Ok(format!("Could not fetch current price for {symbol}")),
        }
    }
}

struct HistoricalPricesTool {
    client: YahooClient,
}

#[async_trait]
impl Tool for HistoricalPricesTool {
    fn name(&self) -> &str {
        "get_historical_stock_prices"
    }

    fn description(&self) -> &str {
        "Get historical OHLCV prices for a ticker as a JSON list."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        symbol_schema(serde_json::json!({
            "period": {"type": "string", "enum": PERIODS, "description": "Range to fetch (default 1mo)"},
            "interval": {"type": "string", "enum": INTERVALS, "description": "Bar interval (default 1d)"}
        }))
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let Some(symbol) = symbol_param(&params) else {
            return Ok("Error: symbol is required".into());
        };
        let period = Some(str_param(&params, "period"))
            .filter(|p| !p.is_empty())
            .unwrap_or("1mo");
        let interval = Some(str_param(&params, "interval"))
            .filter(|i| !i.is_empty())
            .unwrap_or("1d");

        let result = match self.client.chart(&symbol, period, interval).await? {
            Ok(r) => r,
            Err(e) => return Ok(format!("Error fetching historical prices for {symbol}: {e}")),
        };
        Ok(serde_json::to_string(&price_rows(&result))?)
    }
}

/// Flatten Yahoo's column-oriented chart payload into one object per bar.
fn price_rows(result: &serde_json::Value) -> Vec<serde_json::Value> {
    let empty = Vec::new();
    let timestamps = result["timestamp"].as_array().unwrap_or(&empty);
    let quote = &result["indicators"]["quote"][0];
    timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let date = Utc.timestamp_opt(ts.as_i64()?, 0).single()?;
            Some(serde_json::json!({
                "date": date.format("%Y-%m-%d %H:%M").to_string(),
                "open": quote["open"][i],
                "high": quote["high"][i],
                "low": quote["low"][i],
                "close": quote["close"][i],
                "volume": quote["volume"][i],
            }))
        })
        .collect()
}

struct CompanyNewsTool {
    client: YahooClient,
}

#[async_trait]
impl Tool for CompanyNewsTool {
    fn name(&self) -> &str {
        "get_company_news"
    }

    fn description(&self) -> &str {
        "Get recent news headlines for a company by ticker symbol."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        symbol_schema(serde_json::json!({
            "num_stories": {
                "type": "integer",
                "description": "Number of stories to return (default 3)",
                "minimum": 1,
                "maximum": 20
            }
        }))
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let Some(symbol) = symbol_param(&params) else {
            return Ok("Error: symbol is required".into());
        };
        let count = int_param(&params, "num_stories", 3, 1, 20);
        let body = self
            .client
            .get(
                &["v1", "finance", "search"],
                &[
                    ("q", symbol.clone()),
                    ("newsCount", count.to_string()),
                    ("quotesCount", "0".to_string()),
                ],
            )
            .await?;
        let news: Vec<serde_json::Value> = body["news"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(count as usize)
                    .map(|n| {
                        let published = n["providerPublishTime"]
                            .as_i64()
                            .and_then(|t| Utc.timestamp_opt(t, 0).single())
                            .map(|d| d.to_rfc3339());
                        serde_json::json!({
                            "title": n["title"],
                            "publisher": n["publisher"],
                            "link": n["link"],
                            "published": published,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        if news.is_empty() {
            return Ok(format!("No news found for {symbol}"));
        }
        Ok(serde_json::to_string(&news)?)
    }
}
