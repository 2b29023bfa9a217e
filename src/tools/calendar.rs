//! Google Calendar tools. Registered so agents can reference them, but every
//! call reports that the integration is not available yet.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::credentials::Service;
use super::{ToolCategory, ToolError, ToolHandler, ToolSpec};

pub fn specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "create_event",
            aliases: &[],
            description: "Create a calendar event",
            category: ToolCategory::Calendar,
            parameters: json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string"},
                    "start": {"type": "string", "description": "RFC 3339 start time"},
                    "end": {"type": "string", "description": "RFC 3339 end time"},
                    "attendees": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["summary", "start", "end"]
            }),
        },
        ToolSpec {
            name: "list_events",
            aliases: &[],
            description: "List upcoming calendar events",
            category: ToolCategory::Calendar,
            parameters: json!({
                "type": "object",
                "properties": {
                    "time_min": {"type": "string"},
                    "time_max": {"type": "string"},
                    "limit": {"type": "integer"}
                }
            }),
        },
        ToolSpec {
            name: "get_free_busy",
            aliases: &[],
            description: "Query free/busy information",
            category: ToolCategory::Calendar,
            parameters: json!({
                "type": "object",
                "properties": {
                    "time_min": {"type": "string"},
                    "time_max": {"type": "string"},
                    "emails": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["time_min", "time_max"]
            }),
        },
    ]
}

pub struct CalendarHandler;

#[async_trait]
impl ToolHandler for CalendarHandler {
    fn server(&self) -> &'static str {
        "calendar"
    }

    fn specs(&self) -> Vec<ToolSpec> {
        specs()
    }

    fn credentials(&self) -> Option<Service> {
        Some(Service::Google)
    }

    async fn call(&self, tool: &str, _params: &Value) -> Result<Value, ToolError> {
        Ok(json!({
            "error": format!("Tool '{tool}' is not yet implemented"),
            "available_soon": true,
        }))
    }
}
