//! Prompt templates and the fixed prompt flows built on them.
//!
//! Every flow has the same linear shape: a typed input, `{{var}}`
//! substitution into a template, one LLM call, a typed output.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::agents::CatalogEntry;
use crate::db::models::Agent;
use crate::knowledge::WebsiteSnippet;
use crate::llm::{GenerateRequest, LlmClient};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

const TITLE_MAX_CHARS: usize = 60;
const FALLBACK_TITLE_CHARS: usize = 40;

const WEBSITE_TEMPLATE: &str =
    "Información del sitio web de la empresa ({{url}}):\n{{content}}";

const TITLE_SYSTEM: &str = "Eres un asistente que pone títulos cortos a conversaciones. \
Responde únicamente con el título, sin comillas ni puntuación final.";

const TITLE_TEMPLATE: &str = "Genera un título breve (máximo 6 palabras) en español para una conversación que comienza así:\n\n\
Usuario: {{user_message}}\n\nAsistente: {{assistant_reply}}";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PromptError {
    #[error("missing template variable: {0}")]
    MissingVariable(String),
}

/// A string template with `{{name}}` placeholders.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for cap in PLACEHOLDER.captures_iter(&self.source) {
            let name = &cap[1];
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Substitute every placeholder. Extra variables are ignored.
    pub fn render(&self, vars: &HashMap<&str, String>) -> Result<String, PromptError> {
        if let Some(missing) = self
            .placeholders()
            .into_iter()
            .find(|name| !vars.contains_key(name.as_str()))
        {
            return Err(PromptError::MissingVariable(missing));
        }

        let rendered = PLACEHOLDER.replace_all(&self.source, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

// ── Agent context flow ───────────────────────────────────────────────

pub struct AgentContextInput<'a> {
    pub agent: &'a Agent,
    pub client_context: Option<&'a str>,
    pub catalogue: &'a [CatalogEntry],
    pub website: Option<&'a WebsiteSnippet>,
}

/// Assemble the system instruction for one agent call.
pub fn build_agent_context(input: &AgentContextInput<'_>) -> Result<String, PromptError> {
    let mut parts: Vec<String> = Vec::new();

    if !input.agent.system_prompt.trim().is_empty() {
        parts.push(input.agent.system_prompt.clone());
    }

    if let Some(ctx) = input.client_context.map(str::trim).filter(|c| !c.is_empty()) {
        parts.push(format!("Contexto del cliente: {ctx}"));
    }

    let tools_info: Vec<String> = input
        .agent
        .tools
        .iter()
        .filter_map(|id| input.catalogue.iter().find(|entry| entry.id == id))
        .map(|entry| format!("- {} {}: {}", entry.icon, entry.name, entry.description))
        .collect();
    if !tools_info.is_empty() {
        parts.push(format!("Herramientas disponibles:\n{}", tools_info.join("\n")));
    }

    if let Some(site) = input.website {
        let vars = HashMap::from([("url", site.url.clone()), ("content", site.text.clone())]);
        parts.push(PromptTemplate::new(WEBSITE_TEMPLATE).render(&vars)?);
    }

    Ok(parts.join("\n\n"))
}

// ── Title flow ───────────────────────────────────────────────────────

pub struct TitleInput<'a> {
    pub user_message: &'a str,
    pub assistant_reply: &'a str,
}

/// Ask the model for a conversation title. Never fails: any error or an
/// unusable answer yields [`fallback_title`].
pub async fn title_flow(llm: &dyn LlmClient, input: &TitleInput<'_>) -> String {
    let vars = HashMap::from([
        ("user_message", input.user_message.to_string()),
        ("assistant_reply", input.assistant_reply.to_string()),
    ]);
    let message = match PromptTemplate::new(TITLE_TEMPLATE).render(&vars) {
        Ok(m) => m,
        Err(e) => {
            warn!("Title prompt failed to render: {e}");
            return fallback_title(input.user_message);
        }
    };

    let mut request = GenerateRequest::new(TITLE_SYSTEM, message);
    request.temperature = Some(0.3);

    match llm.generate(&request).await {
        Ok(response) => match clean_title(&response.text) {
            Some(title) => {
                debug!("Generated title: {title}");
                title
            }
            None => fallback_title(input.user_message),
        },
        Err(e) => {
            warn!("Title generation failed: {e}");
            fallback_title(input.user_message)
        }
    }
}

/// Normalize a model-produced title: first non-empty line, no quotes or
/// markdown emphasis, at most 60 characters.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .strip_prefix("Título:")
        .or_else(|| line.strip_prefix("Titulo:"))
        .unwrap_or(line);
    let stripped = line
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '«' | '»' | '*' | '#' | '`'))
        .trim()
        .trim_end_matches('.')
        .trim();
    if stripped.is_empty() {
        return None;
    }
    Some(truncate_chars(stripped, TITLE_MAX_CHARS))
}

/// Placeholder title of a conversation nobody has named.
pub const DEFAULT_TITLE: &str = "Nueva conversación";

/// Title used when the model cannot provide one.
pub fn fallback_title(message: &str) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if collapsed.chars().count() <= FALLBACK_TITLE_CHARS {
        return collapsed;
    }
    let head: String = collapsed.chars().take(FALLBACK_TITLE_CHARS).collect();
    format!("{}…", head.trim_end())
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect::<String>().trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::defaults::{AVAILABLE_TOOLS, builtin_agent};
    use crate::llm::mock::MockLlm;

    #[test]
    fn test_placeholders_in_order_without_duplicates() {
        let t = PromptTemplate::new("{{a}} y {{ b }} y {{a}}");
        assert_eq!(t.placeholders(), vec!["a", "b"]);
    }

    #[test]
    fn test_render_substitutes_and_ignores_extra() {
        let t = PromptTemplate::new("Hola {{name}}!");
        let vars = HashMap::from([("name", "Ana".to_string()), ("extra", "x".to_string())]);
        assert_eq!(t.render(&vars).unwrap(), "Hola Ana!");
    }

    #[test]
    fn test_render_missing_variable() {
        let t = PromptTemplate::new("{{user_message}} / {{assistant_reply}}");
        let vars = HashMap::from([("user_message", "hola".to_string())]);
        assert_eq!(
            t.render(&vars),
            Err(PromptError::MissingVariable("assistant_reply".into()))
        );
    }

    #[test]
    fn test_render_does_not_expand_values() {
        let t = PromptTemplate::new("{{a}}");
        let vars = HashMap::from([("a", "{{b}}".to_string())]);
        assert_eq!(t.render(&vars).unwrap(), "{{b}}");
    }

    #[test]
    fn test_agent_context_sections() {
        let agent = builtin_agent("posiAgent").unwrap();
        let site = WebsiteSnippet {
            url: "https://example.com".into(),
            text: "Somos una empresa".into(),
        };
        let context = build_agent_context(&AgentContextInput {
            agent: &agent,
            client_context: Some("  Cliente ACME  "),
            catalogue: AVAILABLE_TOOLS,
            website: Some(&site),
        })
        .unwrap();

        assert!(context.starts_with("Eres Posi"));
        assert!(context.contains("Contexto del cliente: Cliente ACME"));
        assert!(context.contains("Herramientas disponibles:\n- 🌐 Búsqueda Web"));
        assert!(context.contains("(https://example.com):\nSomos una empresa"));
    }

    #[test]
    fn test_agent_context_skips_empty_parts() {
        let mut agent = builtin_agent("minutaMaker").unwrap();
        agent.tools = vec!["unknown_tool".into()];
        let context = build_agent_context(&AgentContextInput {
            agent: &agent,
            client_context: Some("   "),
            catalogue: AVAILABLE_TOOLS,
            website: None,
        })
        .unwrap();
        assert!(!context.contains("Contexto del cliente"));
        assert!(!context.contains("Herramientas disponibles"));
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(
            clean_title("\n\"Planificación del sprint.\"\nextra").as_deref(),
            Some("Planificación del sprint")
        );
        assert_eq!(clean_title("Título: **Minuta ACME**").as_deref(), Some("Minuta ACME"));
        assert_eq!(clean_title("  \n \"\" "), None);
        let long = "a".repeat(100);
        assert_eq!(clean_title(&long).unwrap().chars().count(), 60);
    }

    #[test]
    fn test_fallback_title() {
        assert_eq!(fallback_title("Hola   mundo"), "Hola mundo");
        assert_eq!(fallback_title(""), "Nueva conversación");
        let long = "ñ".repeat(50);
        let title = fallback_title(&long);
        assert!(title.ends_with('…'));
        assert_eq!(title.chars().count(), 41);
    }

    #[tokio::test]
    async fn test_title_flow_uses_model_reply() {
        let llm = MockLlm::new().with_reply("\"Resumen de reunión\"");
        let title = title_flow(
            &llm,
            &TitleInput {
                user_message: "Necesito una minuta",
                assistant_reply: "Claro, pásame la transcripción",
            },
        )
        .await;
        assert_eq!(title, "Resumen de reunión");
        let requests = llm.requests();
        assert!(requests[0].message.contains("Usuario: Necesito una minuta"));
    }

    #[tokio::test]
    async fn test_title_flow_falls_back_on_error() {
        let llm = MockLlm::new().with_failure("boom");
        let title = title_flow(
            &llm,
            &TitleInput {
                user_message: "¿Cuál es el horario de la oficina?",
                assistant_reply: "De 9 a 18",
            },
        )
        .await;
        assert_eq!(title, "¿Cuál es el horario de la oficina?");
    }
}
