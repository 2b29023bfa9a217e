/// End-to-end tests of the HTTP API in test mode.
///
/// Each test starts the real router on an ephemeral port with mock tools,
/// a mock LLM and `dev:<email>` tokens, then drives it with reqwest.
use agent_hub::auth::Authenticator;
use agent_hub::chat::ChatService;
use agent_hub::config::{Config, Mode};
use agent_hub::db::Db;
use agent_hub::knowledge::WebsiteContext;
use agent_hub::llm;
use agent_hub::server::{AppState, router};
use agent_hub::tools::Dispatcher;
use agent_hub::tools::credentials::CredentialStore;
use agent_hub::tools::executor::ToolExecutor;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

const ANA: &str = "Bearer dev:ana@positiveit.com.ar";
const BOSS: &str = "Bearer dev:boss@positiveit.com.ar";
const OUTSIDER: &str = "Bearer dev:eve@gmail.com";

struct TestServer {
    base: String,
    http: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = Config::default();
        config.mode = Mode::Test;
        config.auth.admin_emails = vec!["boss@positiveit.com.ar".into()];
        let config = Arc::new(config);

        let db = Arc::new(TokioMutex::new(Db::open_in_memory().unwrap()));
        let credentials = Arc::new(CredentialStore::from_lookup(|_| None).unwrap());
        let dispatcher = Dispatcher::from_config(&config, credentials.clone()).unwrap();
        let executor = Arc::new(ToolExecutor::new(Arc::new(dispatcher), credentials.clone()));
        let chat = ChatService::new(
            db,
            llm::from_config(&config).unwrap(),
            executor,
            Arc::new(WebsiteContext::disabled()),
        );
        let state = AppState {
            auth: Authenticator::from_config(&config).unwrap(),
            config,
            chat,
            credentials,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        let resp = self
            .http
            .get(self.url(path))
            .header("Authorization", token)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .http
            .post(self.url(path))
            .header("Authorization", token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn test_health_and_auth_gate() {
    let server = TestServer::start().await;

    let resp = server.http.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["mode"], "test");

    let resp = server
        .http
        .post(server.url("/chat_with_agent"))
        .json(&json!({"agentId": "posiAgent", "message": "Hola"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let (status, body) = server
        .post("/chat_with_agent", OUTSIDER, json!({"agentId": "posiAgent", "message": "Hola"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["userMessage"].as_str().unwrap().contains("permiso"));
}

/// Chat → conversation list → history → delete
#[tokio::test]
async fn test_chat_and_conversations() {
    let server = TestServer::start().await;

    // 1. First message creates a conversation and titles it
    let (status, reply) = server
        .post(
            "/chat_with_agent",
            ANA,
            json!({"agentId": "posiAgent", "message": "Hola", "clientContext": "ACME"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response"], "[mock] Hola");
    assert_eq!(reply["agentId"], "posiAgent");
    assert!(reply["title"].is_string());
    let conversation_id = reply["conversationId"].as_str().unwrap().to_string();

    // 2. The mock echoes the call back, so the parser runs it
    let (status, reply) = server
        .post(
            "/chat_with_agent",
            ANA,
            json!({
                "agentId": "posiAgent",
                "message": "web_search(query=\"rust\")",
                "conversationId": conversation_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["toolResults"].as_array().unwrap().len(), 1);
    assert_eq!(reply["toolResults"][0]["toolName"], "web_search");
    assert!(reply["response"].as_str().unwrap().contains("🔧 **Tool: web_search**"));

    // 3. History
    let (status, list) = server.get("/conversations", ANA).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["conversations"].as_array().unwrap().len(), 1);

    let (status, detail) = server
        .get(&format!("/conversations/{conversation_id}"), ANA)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["messages"].as_array().unwrap().len(), 4);
    assert_eq!(detail["messages"][0]["role"], "user");

    // 4. Other users cannot see it
    let (status, _) = server
        .get(&format!("/conversations/{conversation_id}"), BOSS)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // 5. Delete
    let resp = server
        .http
        .delete(server.url(&format!("/conversations/{conversation_id}")))
        .header("Authorization", ANA)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let (_, list) = server.get("/conversations", ANA).await;
    assert!(list["conversations"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_rejections() {
    let server = TestServer::start().await;

    let (status, _) = server
        .post("/chat_with_agent", ANA, json!({"agentId": "ghost", "message": "Hola"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .post(
            "/chat_with_agent",
            ANA,
            json!({"agentId": "posiAgent", "message": "Hola", "conversationId": "nope"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .post("/chat_with_agent", ANA, json!({"agentId": "posiAgent", "message": "  "}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Create → list → update → disable → configs, with admin checks
#[tokio::test]
async fn test_agent_management() {
    let server = TestServer::start().await;
    let new_agent = json!({
        "agentId": "soporte",
        "name": "Soporte",
        "description": "Mesa de ayuda",
        "systemPrompt": "Eres el agente de soporte.",
        "tools": ["jira"],
    });

    let (status, _) = server.post("/create_agent", ANA, new_agent.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server.post("/create_agent", BOSS, new_agent.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["agentId"], "soporte");
    assert_eq!(body["toolValidation"]["valid"], true);

    let (status, _) = server.post("/create_agent", BOSS, new_agent).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, all) = server.get("/get_all_agents", ANA).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["count"], 4);
    assert_eq!(all["is_admin"], false);
    assert_eq!(all["agents"]["soporte"]["category"], "custom");

    let (_, custom) = server.get("/get_all_agents?category=custom", ANA).await;
    assert_eq!(custom["count"], 1);
    assert!(custom["agents"]["soporte"].is_object());

    let (status, body) = server
        .post(
            "/update_agent",
            BOSS,
            json!({"agentId": "soporte", "tools": ["jira", "teleport"]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["toolValidation"]["valid"], false);
    assert_eq!(body["toolValidation"]["invalid_tools"], json!(["teleport"]));

    let (status, body) = server
        .post("/delete_agent", BOSS, json!({"agentId": "soporte"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Agent disabled successfully");

    let (status, _) = server
        .post("/chat_with_agent", ANA, json!({"agentId": "soporte", "message": "Hola"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .post(
            "/update_agent_config",
            BOSS,
            json!({"agentId": "minutaMaker", "systemPrompt": "Nuevo", "tools": ["email"]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, configs) = server.get("/get_agent_configs", BOSS).await;
    assert_eq!(configs["agents"]["minutaMaker"]["system_prompt"], "Nuevo");
    assert_eq!(configs["agents"]["minutaMaker"]["editable"], true);

    let (status, body) = server.post("/migrate_legacy_agents", BOSS, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["migrated_count"], 2);
}

#[tokio::test]
async fn test_tool_endpoints() {
    let server = TestServer::start().await;

    let (status, tools) = server.get("/get_available_mcp_tools", ANA).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tools["tools"]["search_web"]["canonical"], "web_search");
    assert_eq!(tools["tools"]["create_issue"]["server"], "github");
    assert_eq!(tools["servers"].as_array().unwrap().len(), 6);
    assert!(tools["categories"]["jira"].as_array().unwrap().len() >= 7);

    let (status, report) = server.get("/mcp_status", ANA).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "partial");
    assert_eq!(report["servers"]["web_search"]["ready"], true);
    assert_eq!(report["health"]["total_tools"], 30);
}

#[tokio::test]
async fn test_malformed_body_uses_error_json() {
    let server = TestServer::start().await;
    let resp = server
        .http
        .post(server.url("/chat_with_agent"))
        .header("Authorization", ANA)
        .header("Content-Type", "application/json")
        .body("{\"agentId\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());
    assert!(body["userMessage"].as_str().unwrap().contains("solicitud"));
}

#[test]
fn test_config_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hub.json");
    let path = path.to_str().unwrap();

    let mut config = Config::default();
    config.mode = Mode::Test;
    config.knowledge.website_url = Some("https://www.positiveit.com.ar".into());
    config.save(path).unwrap();

    let loaded = Config::load(path).unwrap();
    assert!(loaded.is_test_mode());
    assert_eq!(
        loaded.knowledge.website_url.as_deref(),
        Some("https://www.positiveit.com.ar")
    );
}
