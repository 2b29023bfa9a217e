use agent_hub::agents::{self, AgentManager};
use agent_hub::auth::Authenticator;
use agent_hub::chat::ChatService;
use agent_hub::config::{Config, DEFAULT_CONFIG_PATH};
use agent_hub::db::Db;
use agent_hub::knowledge::WebsiteContext;
use agent_hub::llm;
use agent_hub::mcp::server::{McpContext, McpServer};
use agent_hub::server::{self, AppState};
use agent_hub::tools::Dispatcher;
use agent_hub::tools::catalog;
use agent_hub::tools::credentials::CredentialStore;
use agent_hub::tools::executor::ToolExecutor;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agent-hub", version, about = "Internal chat hub backend")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Expose agents and tools as an MCP server over stdio
    Mcp,
    /// Seed agents into the store, skipping ids that already exist
    MigrateAgents {
        /// YAML file with agent definitions (built-in agents if omitted)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print tool and credential status as JSON
    Status,
    /// Run one tool through the dispatcher
    Tool {
        /// Tool name or alias
        name: String,
        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

struct Services {
    config: Arc<Config>,
    db: Arc<TokioMutex<Db>>,
    credentials: Arc<CredentialStore>,
    chat: ChatService,
}

fn bootstrap(config_path: &str) -> Result<Services> {
    let mut config = Config::load(config_path).context("Failed to load config")?;
    config.apply_env();
    config.validate().context("Invalid configuration")?;
    let config = Arc::new(config);
    info!(
        "Mode: {}",
        if config.is_test_mode() { "test" } else { "production" }
    );

    let db = Db::open(&config.db_path).context("Failed to open database")?;
    let db = Arc::new(TokioMutex::new(db));

    let credentials =
        Arc::new(CredentialStore::from_config(&config.tools).context("Failed to load credentials")?);
    let dispatcher = Dispatcher::from_config(&config, credentials.clone())
        .context("Failed to initialize tool handlers")?;
    let executor = Arc::new(ToolExecutor::new(Arc::new(dispatcher), credentials.clone()));

    let llm = llm::from_config(&config).context("Failed to initialize LLM client")?;
    let website = WebsiteContext::from_config(&config.knowledge, config.is_test_mode())
        .context("Failed to initialize website context")?;

    let chat = ChatService::new(db.clone(), llm, executor, Arc::new(website));
    Ok(Services {
        config,
        db,
        credentials,
        chat,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let services = bootstrap(&cli.config)?;

    match cli.command {
        Command::Serve => {
            let auth = Authenticator::from_config(&services.config)?;
            let state = AppState {
                config: services.config,
                auth,
                chat: services.chat,
                credentials: services.credentials,
            };
            server::serve(state).await?;
        }
        Command::Mcp => {
            let ctx = McpContext {
                chat: services.chat,
                credentials: services.credentials,
            };
            McpServer::new(ctx).start().await?;
        }
        Command::MigrateAgents { file } => {
            let manager = AgentManager::new(services.db.clone());
            let (migrated, total) = match file {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let definitions = agents::parse_agents_yaml(&text)
                        .with_context(|| format!("Invalid agent file {}", path.display()))?;
                    let total = definitions.len();
                    (manager.import(definitions, "cli").await?, total)
                }
                None => {
                    let definitions = agents::defaults::builtin_agents();
                    let total = definitions.len();
                    (manager.migrate_legacy(definitions).await?, total)
                }
            };
            println!("Migrated {migrated} of {total} agents");
        }
        Command::Status => {
            let executor = services.chat.executor();
            let report = serde_json::json!({
                "health": executor.health(),
                "servers": catalog::installation_status(executor.dispatcher(), &services.credentials),
                "credentials": services.credentials.status().await,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Tool { name, params } => {
            let params: serde_json::Value =
                serde_json::from_str(&params).context("--params must be valid JSON")?;
            let result = services.chat.executor().run_tool(&name, params).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
