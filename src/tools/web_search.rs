//! Web search and page reading.
//!
//! Searches go through SerpAPI when a key is configured, otherwise through
//! DuckDuckGo's instant answer API plus its HTML results page.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::credentials::{CredentialStore, Service};
use super::{
    ToolCategory, ToolError, ToolHandler, ToolSpec, optional_str, optional_u64, required_str,
};
use crate::config::ToolsConfig;
use crate::knowledge::{
    MAX_PAGE_BYTES, collapse_whitespace, extract_text, read_capped, truncate_chars,
};

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const DEFAULT_RESULTS: u64 = 5;
const SUMMARY_SOURCE_CHARS: usize = 2000;
const SUMMARY_MAX_CHARS: usize = 500;

pub fn specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "web_search",
            aliases: &["search_web"],
            description: "Search the web for current information",
            category: ToolCategory::WebSearch,
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "num_results": {"type": "integer", "description": "Number of results to return"},
                    "country": {"type": "string", "description": "Country code (e.g. ar, us)"},
                    "language": {"type": "string", "description": "Language code (e.g. es, en)"}
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: "news_search",
            aliases: &["search_news"],
            description: "Search recent news articles",
            category: ToolCategory::WebSearch,
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "num_results": {"type": "integer", "description": "Number of results to return"}
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: "get_page_content",
            aliases: &["fetch_page"],
            description: "Fetch a web page and return its visible text",
            category: ToolCategory::WebSearch,
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Page URL"},
                    "max_chars": {"type": "integer", "description": "Maximum characters of text"}
                },
                "required": ["url"]
            }),
        },
        ToolSpec {
            name: "get_page_summary",
            aliases: &["summarize_page"],
            description: "Short extractive summary of a web page",
            category: ToolCategory::WebSearch,
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Page URL"}
                },
                "required": ["url"]
            }),
        },
    ]
}

/// Search endpoints; overridable for tests.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub serp: String,
    pub ddg_api: String,
    pub ddg_html: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            serp: "https://serpapi.com/search".into(),
            ddg_api: "https://api.duckduckgo.com/".into(),
            ddg_html: "https://html.duckduckgo.com/html/".into(),
        }
    }
}

pub struct WebSearchHandler {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    engine: String,
    page_max_chars: usize,
    endpoints: Endpoints,
}

impl WebSearchHandler {
    pub fn new(config: &ToolsConfig, credentials: Arc<CredentialStore>) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(BROWSER_UA)
            .build()?;
        Ok(Self {
            http,
            credentials,
            engine: config.search_engine.clone(),
            page_max_chars: config.page_max_chars,
            endpoints: Endpoints::default(),
        })
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    fn has_serp(&self) -> bool {
        self.credentials.has(Service::Serp)
    }

    async fn web_search(&self, params: &Value) -> Result<Value, ToolError> {
        let query = required_str(params, "query")?;
        let num = optional_u64(params, "num_results").unwrap_or(DEFAULT_RESULTS);
        if self.has_serp() {
            let country = optional_str(params, "country").unwrap_or("us");
            let language = optional_str(params, "language").unwrap_or("en");
            self.serp_search(query, num, country, language).await
        } else {
            self.duckduckgo_search(query, num).await
        }
    }

    async fn serp_search(
        &self,
        query: &str,
        num: u64,
        country: &str,
        language: &str,
    ) -> Result<Value, ToolError> {
        let num_str = num.to_string();
        let request = self.http.get(&self.endpoints.serp).query(&[
            ("engine", self.engine.as_str()),
            ("q", query),
            ("num", num_str.as_str()),
            ("gl", country),
            ("hl", language),
        ]);
        let request = self.credentials.apply(Service::Serp, request).await?;
        let data = super::check_response(request.send().await?).await?;

        let results: Vec<Value> = data["organic_results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(num as usize)
                    .map(|r| {
                        json!({
                            "title": r["title"].as_str().unwrap_or_default(),
                            "link": r["link"].as_str().unwrap_or_default(),
                            "snippet": r["snippet"].as_str().unwrap_or_default(),
                            "displayed_link": r["displayed_link"].as_str().unwrap_or_default(),
                            "position": r["position"].as_u64().unwrap_or(0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "success": true,
            "count": results.len(),
            "results": results,
            "answer_box": data.get("answer_box").cloned().unwrap_or(json!({})),
            "knowledge_graph": data.get("knowledge_graph").cloned().unwrap_or(json!({})),
            "search_metadata": {
                "query": query,
                "engine": self.engine,
                "total_results": data["search_information"]["total_results"].as_u64().unwrap_or(0),
            }
        }))
    }

    async fn duckduckgo_search(&self, query: &str, num: u64) -> Result<Value, ToolError> {
        let instant = self
            .http
            .get(&self.endpoints.ddg_api)
            .query(&[("q", query), ("format", "json"), ("no_html", "1"), ("skip_disambig", "1")])
            .send()
            .await;
        // The instant answer is optional; the HTML results are not
        let instant_answer = match instant {
            Ok(resp) => resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|d| {
                    d["AbstractText"]
                        .as_str()
                        .filter(|s| !s.is_empty())
                        .or_else(|| d["Answer"].as_str())
                        .map(str::to_string)
                })
                .unwrap_or_default(),
            Err(e) => {
                debug!("DuckDuckGo instant answer failed: {e}");
                String::new()
            }
        };

        let html = self
            .http
            .get(&self.endpoints.ddg_html)
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let results = parse_duckduckgo_results(&html, num as usize);

        Ok(json!({
            "success": true,
            "count": results.len(),
            "results": results,
            "instant_answer": instant_answer,
            "search_metadata": {
                "query": query,
                "engine": "duckduckgo",
                "note": "Using free search - limited results",
            }
        }))
    }

    async fn news_search(&self, params: &Value) -> Result<Value, ToolError> {
        let query = required_str(params, "query")?;
        let num = optional_u64(params, "num_results").unwrap_or(DEFAULT_RESULTS);
        if !self.has_serp() {
            return self.duckduckgo_search(&format!("{query} news"), num).await;
        }

        let num_str = num.to_string();
        let request = self.http.get(&self.endpoints.serp).query(&[
            ("engine", "google_news"),
            ("q", query),
            ("num", num_str.as_str()),
        ]);
        let request = self.credentials.apply(Service::Serp, request).await?;
        let data = super::check_response(request.send().await?).await?;

        let results: Vec<Value> = data["news_results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(num as usize)
                    .map(|r| {
                        json!({
                            "title": r["title"].as_str().unwrap_or_default(),
                            "link": r["link"].as_str().unwrap_or_default(),
                            "snippet": r["snippet"].as_str().unwrap_or_default(),
                            "source": r["source"].get("name").or(r.get("source")).cloned().unwrap_or(Value::Null),
                            "date": r["date"].as_str().unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "success": true,
            "count": results.len(),
            "results": results,
            "search_metadata": {"query": query, "type": "news"}
        }))
    }

    async fn page_content(&self, url: &str, max_chars: usize) -> Result<Value, ToolError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Ok(json!({
                "error": format!("HTTP {}: Could not fetch page", status.as_u16())
            }));
        }
        let html = read_capped(response, MAX_PAGE_BYTES).await?;
        let page = extract_text(&html);

        let content = if page.text.chars().count() > max_chars {
            format!("{}...", truncate_chars(&page.text, max_chars))
        } else {
            page.text
        };

        Ok(json!({
            "success": true,
            "page": {
                "url": url,
                "title": page.title.unwrap_or_else(|| "No title".to_string()),
                "description": page.description.unwrap_or_default(),
                "content_length": content.chars().count(),
                "content": content,
            }
        }))
    }

    async fn page_summary(&self, url: &str) -> Result<Value, ToolError> {
        let page = self.page_content(url, SUMMARY_SOURCE_CHARS).await?;
        if page.get("success").and_then(Value::as_bool) != Some(true) {
            return Ok(page);
        }
        let content = page["page"]["content"].as_str().unwrap_or_default();
        Ok(json!({
            "success": true,
            "summary": {
                "url": url,
                "title": page["page"]["title"],
                "summary": summarize(content),
                "full_content_length": content.chars().count(),
            }
        }))
    }
}

/// First three sentences, capped at 500 characters.
pub fn summarize(content: &str) -> String {
    let summary = content.split(". ").take(3).collect::<Vec<_>>().join(". ");
    if summary.chars().count() > SUMMARY_MAX_CHARS {
        format!("{}...", truncate_chars(&summary, SUMMARY_MAX_CHARS))
    } else {
        summary
    }
}

/// Parse DuckDuckGo's HTML result page.
pub fn parse_duckduckgo_results(html: &str, limit: usize) -> Vec<Value> {
    let document = Html::parse_document(html);
    let (Ok(result_sel), Ok(title_sel), Ok(snippet_sel)) = (
        Selector::parse("div.result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        warn!("Invalid DuckDuckGo selectors");
        return Vec::new();
    };

    document
        .select(&result_sel)
        .filter_map(|div| {
            let title = div.select(&title_sel).next()?;
            let href = title.value().attr("href").unwrap_or_default().to_string();
            let snippet = div
                .select(&snippet_sel)
                .next()
                .map(|s| collapse_whitespace(&s.text().collect::<String>()))
                .unwrap_or_default();
            Some((collapse_whitespace(&title.text().collect::<String>()), href, snippet))
        })
        .take(limit)
        .enumerate()
        .map(|(i, (title, link, snippet))| {
            json!({
                "title": title,
                "link": link,
                "snippet": snippet,
                "displayed_link": link,
                "position": i + 1,
            })
        })
        .collect()
}

#[async_trait]
impl ToolHandler for WebSearchHandler {
    fn server(&self) -> &'static str {
        "web_search"
    }

    fn specs(&self) -> Vec<ToolSpec> {
        specs()
    }

    async fn call(&self, tool: &str, params: &Value) -> Result<Value, ToolError> {
        match tool {
            "web_search" => self.web_search(params).await,
            "news_search" => self.news_search(params).await,
            "get_page_content" => {
                let url = required_str(params, "url")?;
                let max = optional_u64(params, "max_chars")
                    .map(|n| n as usize)
                    .unwrap_or(self.page_max_chars);
                self.page_content(url, max).await
            }
            "get_page_summary" => self.page_summary(required_str(params, "url")?).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}
