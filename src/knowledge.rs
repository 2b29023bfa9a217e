/// Website context for the general-knowledge agent.
///
/// The company website is fetched as raw HTML, reduced to visible text and
/// cached for `refresh_secs`. A failed fetch only means the agent answers
/// without the extra context.
use std::time::{Duration, Instant};

use scraper::{Html, Node, Selector};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::KnowledgeConfig;

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

const MOCK_WEBSITE_TEXT: &str = "Positive IT es una empresa de desarrollo de software \
especializada en soluciones empresariales. (Contenido de prueba)";

/// Visible text of one HTML page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub title: Option<String>,
    /// `<meta name="description">` content.
    pub description: Option<String>,
    pub text: String,
}

/// Text extracted from the configured website, ready to be injected into a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteSnippet {
    pub url: String,
    pub text: String,
}

/// Extract the title and the visible text of an HTML document, with
/// script/style content removed and whitespace collapsed.
pub fn extract_text(html: &str) -> PageText {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .filter(|t| !t.is_empty());

    let description = Selector::parse(r#"meta[name="description"]"#)
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .and_then(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|d| !d.is_empty());

    let mut pieces: Vec<&str> = Vec::new();
    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| match a.value() {
            Node::Element(el) => SKIPPED_ELEMENTS.contains(&el.name()),
            _ => false,
        });
        if !hidden {
            pieces.push(text);
        }
    }

    PageText {
        title,
        description,
        text: collapse_whitespace(&pieces.join(" ")),
    }
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

enum Source {
    Disabled,
    Remote { http: reqwest::Client, url: String },
    Fixed(WebsiteSnippet),
}

pub struct WebsiteContext {
    source: Source,
    max_chars: usize,
    ttl: Duration,
    cache: Mutex<Option<(Instant, WebsiteSnippet)>>,
}

impl WebsiteContext {
    /// Build from config. Test mode serves canned text instead of fetching.
    pub fn from_config(config: &KnowledgeConfig, test_mode: bool) -> Result<Self, reqwest::Error> {
        let source = match &config.website_url {
            None => Source::Disabled,
            Some(url) if test_mode => Source::Fixed(WebsiteSnippet {
                url: url.clone(),
                text: MOCK_WEBSITE_TEXT.to_string(),
            }),
            Some(url) => Source::Remote {
                http: reqwest::Client::builder()
                    .timeout(Duration::from_secs(10))
                    .user_agent(concat!("agent-hub/", env!("CARGO_PKG_VERSION")))
                    .build()?,
                url: url.clone(),
            },
        };
        Ok(Self {
            source,
            max_chars: config.max_chars,
            ttl: Duration::from_secs(config.refresh_secs),
            cache: Mutex::new(None),
        })
    }

    pub fn disabled() -> Self {
        Self {
            source: Source::Disabled,
            max_chars: 0,
            ttl: Duration::ZERO,
            cache: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.source, Source::Disabled)
    }

    /// Current website text, from cache when still fresh.
    pub async fn get(&self) -> Option<WebsiteSnippet> {
        let (http, url) = match &self.source {
            Source::Disabled => return None,
            Source::Fixed(snippet) => return Some(snippet.clone()),
            Source::Remote { http, url } => (http, url),
        };

        let mut cache = self.cache.lock().await;
        if let Some((fetched_at, snippet)) = cache.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                debug!("Website context served from cache");
                return Some(snippet.clone());
            }
        }

        match fetch(http, url).await {
            Ok(html) => {
                let page = extract_text(&html);
                let snippet = WebsiteSnippet {
                    url: url.clone(),
                    text: truncate_chars(&page.text, self.max_chars),
                };
                info!("Website context refreshed: {} chars from {url}", snippet.text.len());
                *cache = Some((Instant::now(), snippet.clone()));
                Some(snippet)
            }
            Err(e) => {
                warn!("Failed to fetch website context from {url}: {e}");
                // stale copy, if any
                cache.as_ref().map(|(_, s)| s.clone())
            }
        }
    }
}

/// Largest page body read before HTML extraction.
pub const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

/// Body of `response` as text, reading at most `max_bytes` of it.
pub async fn read_capped(
    mut response: reqwest::Response,
    max_bytes: usize,
) -> Result<String, reqwest::Error> {
    if let Some(len) = response.content_length().filter(|len| *len as usize > max_bytes) {
        debug!("Page declares {len} bytes, reading the first {max_bytes}");
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = max_bytes - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

async fn fetch(http: &reqwest::Client, url: &str) -> Result<String, reqwest::Error> {
    let response = http.get(url).send().await?.error_for_status()?;
    read_capped(response, MAX_PAGE_BYTES).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAGE: &str = r#"<html><head><title> Positive IT </title><meta name="description" content="Software a medida"><style>body{color:red}</style></head>
<body><h1>Hola</h1><script>var x = 1;</script><p>Somos   una
empresa</p><noscript>activa js</noscript></body></html>"#;

    #[test]
    fn test_extract_text_skips_hidden_content() {
        let page = extract_text(PAGE);
        assert_eq!(page.title.as_deref(), Some("Positive IT"));
        assert_eq!(page.description.as_deref(), Some("Software a medida"));
        assert_eq!(page.text, "Hola Somos una empresa");
    }

    #[tokio::test]
    async fn test_read_capped_stops_at_limit() {
        let app = axum::Router::new().route(
            "/big",
            axum::routing::get(|| async { format!("<p>{}</p>", "a".repeat(50_000)) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = format!("http://{addr}/big");
        let response = reqwest::get(&url).await.unwrap();
        let body = read_capped(response, 1000).await.unwrap();
        assert_eq!(body.len(), 1000);
        assert!(body.starts_with("<p>aaa"));

        let response = reqwest::get(&url).await.unwrap();
        let body = read_capped(response, MAX_PAGE_BYTES).await.unwrap();
        assert_eq!(body.len(), 50_007);
    }

    #[test]
    fn test_truncate_chars_on_boundary() {
        assert_eq!(truncate_chars("añoñ", 2), "añ");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_disabled_and_fixed_sources() {
        let ctx = WebsiteContext::disabled();
        assert!(!ctx.is_enabled());
        assert!(ctx.get().await.is_none());

        let config = KnowledgeConfig {
            website_url: Some("https://example.com".into()),
            ..Default::default()
        };
        let ctx = WebsiteContext::from_config(&config, true).unwrap();
        let snippet = ctx.get().await.unwrap();
        assert_eq!(snippet.url, "https://example.com");
        assert!(snippet.text.contains("Contenido de prueba"));
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_none() {
        let config = KnowledgeConfig {
            website_url: Some("http://127.0.0.1:1/".into()),
            ..Default::default()
        };
        let ctx = WebsiteContext::from_config(&config, false).unwrap();
        assert!(ctx.get().await.is_none());
    }

    #[tokio::test]
    async fn test_remote_fetch_is_cached_and_truncated() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/",
            axum::routing::get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::response::Html(PAGE)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = KnowledgeConfig {
            website_url: Some(format!("http://{addr}/")),
            max_chars: 4,
            refresh_secs: 3600,
        };
        let ctx = WebsiteContext::from_config(&config, false).unwrap();

        let first = ctx.get().await.unwrap();
        assert_eq!(first.text, "Hola");
        let second = ctx.get().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
