//! Web 搜索工具：调用 Tavily 兼容的搜索 API
//!
//! POST {api_key, query, max_results, topic}，把响应中的 results[] 格式化为文本；
//! 结果超过 max_result_chars 时截断并追加 ...[truncated]。

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::config::SearchSection;
use crate::tools::schema::args_schema;
use crate::tools::Tool;

/// search 工具参数
#[allow(dead_code)]
#[derive(JsonSchema)]
struct SearchArgs {
    /// 搜索关键词
    query: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Search 工具：端点、Key、条数与超时由 [tools.search] 配置决定
pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_results: usize,
    topic: String,
    max_result_chars: usize,
}

impl WebSearchTool {
    pub fn new(cfg: &SearchSection) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: cfg.endpoint.clone(),
            api_key: std::env::var(&cfg.api_key_env).ok(),
            max_results: cfg.max_results,
            topic: cfg.topic.clone(),
            max_result_chars: cfg.max_result_chars,
        }
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| "Search API key not configured".to_string())?;
        let body = serde_json::json!({
            "api_key": api_key,
            "query": query,
            "max_results": self.max_results,
            "topic": self.topic,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| format!("Invalid search response: {}", e))?;
        Ok(truncate(format_hits(&parsed.results), self.max_result_chars))
    }
}

fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results.".to_string();
    }
    hits.iter()
        .enumerate()
        .map(|(i, h)| format!("{}. {}\n   {}\n   {}", i + 1, h.title, h.url, h.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate(text: String, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web and return the top results (title, url, snippet). Args: {\"query\": \"search keywords\"}"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<SearchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        tracing::info!(query = %query, "search tool execute");
        self.search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> WebSearchTool {
        WebSearchTool::new(&SearchSection {
            api_key_env: "SCOUT_TEST_UNSET_SEARCH_KEY".to_string(),
            ..SearchSection::default()
        })
    }

    #[test]
    fn test_format_hits() {
        let hits = vec![
            SearchHit {
                title: "Forecast".to_string(),
                url: "https://example.com/a".to_string(),
                content: " Sunny, 21C ".to_string(),
            },
            SearchHit {
                title: "Radar".to_string(),
                url: "https://example.com/b".to_string(),
                content: "Clear".to_string(),
            },
        ];
        let text = format_hits(&hits);
        assert!(text.starts_with("1. Forecast"));
        assert!(text.contains("Sunny, 21C"));
        assert!(text.contains("2. Radar"));
        assert_eq!(format_hits(&[]), "No results.");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc".to_string(), 5), "abc");
        assert_eq!(truncate("abcdef".to_string(), 3), "abc\n...[truncated]");
    }

    #[test]
    fn test_query_is_required_in_schema() {
        let schema = tool().parameters_schema();
        assert_eq!(crate::tools::schema::required_fields(&schema), vec!["query"]);
    }

    #[tokio::test]
    async fn test_missing_query_and_key() {
        let t = tool();
        assert_eq!(t.execute(serde_json::json!({})).await.unwrap_err(), "Missing query");
        let err = t
            .execute(serde_json::json!({"query": "weather"}))
            .await
            .unwrap_err();
        assert!(err.contains("API key"));
    }
}
