//! The chat action: one user message in, one agent reply out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::agents::defaults::AVAILABLE_TOOLS;
use crate::agents::{AgentManager, allowed_tools};
use crate::auth::Identity;
use crate::db::Db;
use crate::db::models::{Agent, Conversation, Message, Role};
use crate::error::{AppError, AppResult};
use crate::knowledge::WebsiteContext;
use crate::llm::{ChatTurn, GenerateRequest, LlmClient};
use crate::prompt::{self, AgentContextInput, TitleInput};
use crate::tools::executor::{ExecutionContext, ToolExecutor};
use crate::tools::{ToolResult, catalog};

/// Message count at which a conversation gets its generated title.
const TITLE_AT_MESSAGES: usize = 2;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatRequest {
    pub agent_id: String,
    pub message: String,
    pub conversation_id: Option<String>,
    pub client_context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub agent_id: String,
    pub tools: Vec<String>,
    pub conversation_id: String,
    pub title: Option<String>,
    pub tool_results: Vec<ToolResult>,
}

/// Reply of one agent turn before persistence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAnswer {
    pub response: String,
    pub agent_id: String,
    pub tools: Vec<String>,
    pub tool_results: Vec<ToolResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

fn llm_failure_text(agent_id: &str, message: &str) -> String {
    format!(
        "¡Hola! Soy el agente {agent_id}. Has dicho: '{message}'. Estoy teniendo un problema con la IA. Por favor, intenta de nuevo."
    )
}

fn llm_missing_text(agent_id: &str, message: &str) -> String {
    format!("¡Hola! Soy el agente {agent_id}. Has dicho: '{message}'. La IA no está configurada.")
}

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Mutex<Db>>,
    agents: AgentManager,
    llm: Option<Arc<dyn LlmClient>>,
    executor: Arc<ToolExecutor>,
    website: Arc<WebsiteContext>,
}

impl ChatService {
    pub fn new(
        db: Arc<Mutex<Db>>,
        llm: Option<Arc<dyn LlmClient>>,
        executor: Arc<ToolExecutor>,
        website: Arc<WebsiteContext>,
    ) -> Self {
        Self {
            agents: AgentManager::new(db.clone()),
            db,
            llm,
            executor,
            website,
        }
    }

    pub fn agents(&self) -> &AgentManager {
        &self.agents
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    async fn enabled_agent(&self, agent_id: &str) -> AppResult<Agent> {
        match self.agents.get(agent_id).await? {
            Some(agent) if agent.enabled => Ok(agent),
            _ => Err(AppError::NotFound("Agent not found".into())),
        }
    }

    async fn owned_conversation(&self, identity: &Identity, id: &str) -> AppResult<Conversation> {
        match self.db.lock().await.get_conversation(id)? {
            Some(conv) if conv.user_id == identity.uid => Ok(conv),
            _ => Err(AppError::NotFound("Conversation not found".into())),
        }
    }

    /// One agent turn: context, LLM call, tool execution. LLM failures
    /// become a Spanish fallback reply instead of an error.
    async fn respond(
        &self,
        agent: &Agent,
        user_id: &str,
        conversation_id: Option<&str>,
        message: &str,
        client_context: Option<&str>,
        history: Vec<ChatTurn>,
    ) -> AppResult<AgentAnswer> {
        let website = if agent.context_type == "general" {
            self.website.get().await
        } else {
            None
        };
        let system = prompt::build_agent_context(&AgentContextInput {
            agent,
            client_context,
            catalogue: AVAILABLE_TOOLS,
            website: website.as_ref(),
        })?;

        let allowed = allowed_tools(agent, self.executor.dispatcher());
        let mut request = GenerateRequest::new(system, message);
        request.history = history;
        request.functions = catalog::function_declarations(self.executor.dispatcher(), &allowed);

        let Some(llm) = &self.llm else {
            warn!("No LLM configured, answering {} with fallback", agent.id);
            return Ok(AgentAnswer {
                response: llm_missing_text(&agent.id, message),
                agent_id: agent.id.clone(),
                tools: agent.tools.clone(),
                tool_results: Vec::new(),
            });
        };

        let (response, tool_results) = match llm.generate(&request).await {
            Ok(generated) => {
                info!(
                    "Model reply for {}: {} chars, {} native calls",
                    agent.id,
                    generated.text.len(),
                    generated.function_calls.len()
                );
                let ctx = ExecutionContext {
                    agent_id: agent.id.clone(),
                    user_id: user_id.to_string(),
                    conversation_id: conversation_id.map(str::to_string),
                    allowed_tools: allowed,
                };
                self.executor
                    .process_llm_response(&generated.text, generated.function_calls, &ctx)
                    .await
            }
            Err(e) => {
                warn!("LLM call failed for {}: {e}", agent.id);
                (llm_failure_text(&agent.id, message), Vec::new())
            }
        };

        Ok(AgentAnswer {
            response,
            agent_id: agent.id.clone(),
            tools: agent.tools.clone(),
            tool_results,
        })
    }

    pub async fn chat(&self, identity: &Identity, req: ChatRequest) -> AppResult<ChatReply> {
        let message = req.message.trim();
        if message.is_empty() {
            return Err(AppError::BadRequest("Message is required".into()));
        }
        let agent = self.enabled_agent(&req.agent_id).await?;

        let conversation = match req.conversation_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                let conv = self.owned_conversation(identity, id).await?;
                if conv.agent_id != agent.id {
                    return Err(AppError::BadRequest(format!(
                        "Conversation {id} belongs to agent {}",
                        conv.agent_id
                    )));
                }
                conv
            }
            None => self
                .db
                .lock()
                .await
                .create_conversation(&identity.uid, &agent.id, None)?,
        };

        let history: Vec<ChatTurn> = self
            .db
            .lock()
            .await
            .messages(&conversation.id)?
            .into_iter()
            .map(|m| match m.role {
                Role::User => ChatTurn::user(m.content),
                Role::Assistant => ChatTurn::model(m.content),
            })
            .collect();
        info!(
            "Chat with {} in {} ({} prior messages)",
            agent.id,
            conversation.id,
            history.len()
        );

        let answer = self
            .respond(
                &agent,
                &identity.uid,
                Some(&conversation.id),
                message,
                req.client_context.as_deref(),
                history,
            )
            .await?;

        let count = {
            let mut db = self.db.lock().await;
            db.append_message(&conversation.id, Role::User, message)?;
            db.append_message(&conversation.id, Role::Assistant, &answer.response)?
        };

        let untitled = conversation
            .title
            .as_deref()
            .is_none_or(|t| t.trim().is_empty() || t == prompt::DEFAULT_TITLE);
        let title = if count == TITLE_AT_MESSAGES && untitled {
            let title = match &self.llm {
                Some(llm) => {
                    prompt::title_flow(
                        llm.as_ref(),
                        &TitleInput {
                            user_message: message,
                            assistant_reply: &answer.response,
                        },
                    )
                    .await
                }
                None => prompt::fallback_title(message),
            };
            self.db.lock().await.set_title(&conversation.id, &title)?;
            Some(title)
        } else {
            conversation.title
        };

        Ok(ChatReply {
            response: answer.response,
            agent_id: answer.agent_id,
            tools: answer.tools,
            conversation_id: conversation.id,
            title,
            tool_results: answer.tool_results,
        })
    }

    /// One-shot question without a conversation.
    pub async fn ask(
        &self,
        agent_id: &str,
        message: &str,
        client_context: Option<&str>,
    ) -> AppResult<AgentAnswer> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AppError::BadRequest("Message is required".into()));
        }
        let agent = self.enabled_agent(agent_id).await?;
        self.respond(&agent, "mcp", None, message, client_context, Vec::new())
            .await
    }

    // ── Conversation CRUD ────────────────────────────────────────────

    pub async fn create_conversation(
        &self,
        identity: &Identity,
        agent_id: &str,
        title: Option<&str>,
    ) -> AppResult<Conversation> {
        let agent = self.enabled_agent(agent_id).await?;
        let conv = self
            .db
            .lock()
            .await
            .create_conversation(&identity.uid, &agent.id, title)?;
        Ok(conv)
    }

    pub async fn list_conversations(&self, identity: &Identity) -> AppResult<Vec<Conversation>> {
        Ok(self.db.lock().await.list_conversations(&identity.uid)?)
    }

    pub async fn conversation(&self, identity: &Identity, id: &str) -> AppResult<ConversationDetail> {
        let conversation = self.owned_conversation(identity, id).await?;
        let messages = self.db.lock().await.messages(id)?;
        Ok(ConversationDetail {
            conversation,
            messages,
        })
    }

    pub async fn delete_conversation(&self, identity: &Identity, id: &str) -> AppResult<()> {
        self.owned_conversation(identity, id).await?;
        self.db.lock().await.delete_conversation(id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerateResponse;
    use crate::llm::mock::MockLlm;
    use crate::tools::credentials::CredentialStore;
    use crate::tools::mock::mock_handlers;
    use crate::tools::{Dispatcher, ToolCall};
    use serde_json::json;

    fn service(llm: Option<Arc<MockLlm>>) -> ChatService {
        let db = Arc::new(Mutex::new(Db::open_in_memory().unwrap()));
        let creds = Arc::new(CredentialStore::from_lookup(|_| None).unwrap());
        let executor = Arc::new(ToolExecutor::new(
            Arc::new(Dispatcher::new(mock_handlers())),
            creds,
        ));
        let llm = llm.map(|l| l as Arc<dyn LlmClient>);
        ChatService::new(db, llm, executor, Arc::new(WebsiteContext::disabled()))
    }

    fn ana() -> Identity {
        Identity {
            uid: "ana-uid".into(),
            email: "ana@positiveit.com.ar".into(),
        }
    }

    fn request(agent: &str, message: &str, conversation: Option<&str>) -> ChatRequest {
        ChatRequest {
            agent_id: agent.into(),
            message: message.into(),
            conversation_id: conversation.map(str::to_string),
            client_context: Some("Cliente ACME".into()),
        }
    }

    #[tokio::test]
    async fn test_first_exchange_creates_conversation_and_title() {
        let llm = Arc::new(
            MockLlm::new()
                .with_reply("Hola, ¿en qué te ayudo?")
                .with_reply("\"Saludo inicial.\""),
        );
        let svc = service(Some(llm.clone()));

        let reply = svc.chat(&ana(), request("posiAgent", "Hola", None)).await.unwrap();
        assert_eq!(reply.response, "Hola, ¿en qué te ayudo?");
        assert_eq!(reply.title.as_deref(), Some("Saludo inicial"));
        assert_eq!(reply.agent_id, "posiAgent");

        let requests = llm.requests();
        assert!(requests[0].system.contains("Contexto del cliente: Cliente ACME"));
        assert!(!requests[0].functions.is_empty());

        // Second exchange keeps the title and sends history
        let again = svc
            .chat(&ana(), request("posiAgent", "Otra cosa", Some(&reply.conversation_id)))
            .await
            .unwrap();
        assert_eq!(again.title.as_deref(), Some("Saludo inicial"));
        assert_eq!(llm.requests()[2].history.len(), 2);

        let detail = svc.conversation(&ana(), &reply.conversation_id).await.unwrap();
        assert_eq!(detail.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_llm_failure_returns_fallback_text() {
        let llm = Arc::new(MockLlm::new().with_failure("quota").with_failure("quota"));
        let svc = service(Some(llm));
        let reply = svc.chat(&ana(), request("minutaMaker", "Hola", None)).await.unwrap();
        assert_eq!(
            reply.response,
            "¡Hola! Soy el agente minutaMaker. Has dicho: 'Hola'. Estoy teniendo un problema con la IA. Por favor, intenta de nuevo."
        );
        assert_eq!(reply.title.as_deref(), Some("Hola"));
    }

    #[tokio::test]
    async fn test_without_llm() {
        let svc = service(None);
        let reply = svc.chat(&ana(), request("posiAgent", "Hola", None)).await.unwrap();
        assert!(reply.response.ends_with("La IA no está configurada."));
    }

    #[tokio::test]
    async fn test_native_tool_calls_are_executed() {
        let response = GenerateResponse {
            text: "Busco eso.".into(),
            function_calls: vec![ToolCall::new("web_search", json!({"query": "rust"}))],
        };
        let llm = Arc::new(MockLlm::new().with_response(response).with_reply("Búsqueda"));
        let svc = service(Some(llm));
        let reply = svc.chat(&ana(), request("posiAgent", "Busca rust", None)).await.unwrap();
        assert_eq!(reply.tool_results.len(), 1);
        assert!(reply.tool_results[0].success);
        assert!(reply.response.contains("🔧 **Tool: web_search**"));
    }

    #[tokio::test]
    async fn test_rejections() {
        let svc = service(Some(Arc::new(MockLlm::new())));
        assert!(matches!(
            svc.chat(&ana(), request("posiAgent", "  ", None)).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            svc.chat(&ana(), request("ghost", "Hola", None)).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            svc.chat(&ana(), request("posiAgent", "Hola", Some("missing"))).await,
            Err(AppError::NotFound(_))
        ));

        svc.agents().delete("posiAgent", false, "admin").await.unwrap();
        assert!(matches!(
            svc.chat(&ana(), request("posiAgent", "Hola", None)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_existing_conversation_keeps_agent_and_title() {
        let llm = Arc::new(MockLlm::new());
        let svc = service(Some(llm.clone()));
        let named = svc
            .create_conversation(&ana(), "posiAgent", Some("Plan Q3"))
            .await
            .unwrap();

        let wrong_agent = svc
            .chat(&ana(), request("minutaMaker", "Hola", Some(&named.id)))
            .await;
        assert!(matches!(wrong_agent, Err(AppError::BadRequest(_))));

        let reply = svc
            .chat(&ana(), request("posiAgent", "Hola", Some(&named.id)))
            .await
            .unwrap();
        assert_eq!(reply.title.as_deref(), Some("Plan Q3"));
        // No title request after the answer
        assert_eq!(llm.requests().len(), 1);

        let placeholder = svc
            .create_conversation(&ana(), "posiAgent", Some(prompt::DEFAULT_TITLE))
            .await
            .unwrap();
        let reply = svc
            .chat(&ana(), request("posiAgent", "Hola", Some(&placeholder.id)))
            .await
            .unwrap();
        assert_ne!(reply.title.as_deref(), Some(prompt::DEFAULT_TITLE));
    }

    #[tokio::test]
    async fn test_conversations_are_private() {
        let svc = service(Some(Arc::new(MockLlm::new())));
        let conv = svc
            .create_conversation(&ana(), "posiAgent", Some("Mía"))
            .await
            .unwrap();
        let bob = Identity {
            uid: "bob-uid".into(),
            email: "bob@positiveit.com.ar".into(),
        };
        assert!(svc.conversation(&bob, &conv.id).await.is_err());
        assert!(svc.delete_conversation(&bob, &conv.id).await.is_err());
        assert!(svc.list_conversations(&bob).await.unwrap().is_empty());

        svc.delete_conversation(&ana(), &conv.id).await.unwrap();
        assert!(svc.list_conversations(&ana()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ask_is_stateless() {
        let svc = service(Some(Arc::new(MockLlm::new())));
        let answer = svc.ask("posiAgent", "hola", None).await.unwrap();
        assert_eq!(answer.response, "[mock] hola");
        assert!(svc.list_conversations(&ana()).await.unwrap().is_empty());
    }
}
