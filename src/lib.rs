//! # agent-hub: internal chat hub backend
//!
//! Company-only chat with prompt-templated LLM agents. Conversations are
//! stored in SQLite, agents can call service integrations (web search,
//! GitHub, JIRA, Google Drive, Gmail) through a tool dispatcher, and the
//! same agents and tools are exposed over the Model Context Protocol.
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON configuration with environment overrides
//! - **[`db`]**: SQLite store for agents, conversations and messages
//! - **[`agents`]**: built-in agents, tool catalogue and agent management
//! - **[`prompt`]**: `{{var}}` templates and the fixed prompt flows
//! - **[`llm`]**: LLM client trait, Gemini REST client and a scripted mock
//! - **[`knowledge`]**: company website text injected as agent context
//! - **[`auth`]**: bearer-token verification and the company domain gate
//! - **[`tools`]**: tool dispatch, call parsing, execution and credentials
//! - **[`chat`]**: the chat action and conversation CRUD
//! - **[`server`]**: HTTP API (axum)
//! - **[`mcp`]**: MCP server over stdio (rmcp)

pub mod agents;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod mcp;
pub mod prompt;
pub mod server;
pub mod tools;
