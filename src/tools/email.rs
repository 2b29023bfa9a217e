//! Email tools over the Gmail API.
//!
//! Messages are assembled as RFC 2822 text and posted base64url-encoded to
//! `users/me/messages/send` or `users/me/drafts`.

use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use chrono::Utc;
use regex::Regex;
use serde_json::{Value, json};
use tracing::info;

use super::credentials::{CredentialStore, Service};
use super::{ToolCategory, ToolError, ToolHandler, ToolSpec, check_response, optional_str, required_str};

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s<>,]+@[^@\s<>,]+\.[^@\s<>,]+$").unwrap());

pub fn specs() -> Vec<ToolSpec> {
    let recipients = json!({
        "to": {"type": "string", "description": "Recipient address"},
        "subject": {"type": "string"},
        "cc": {"type": "string", "description": "Comma separated addresses"},
        "bcc": {"type": "string", "description": "Comma separated addresses"}
    });
    let with = |extra: Value| {
        let mut props = recipients.clone();
        if let (Some(p), Some(e)) = (props.as_object_mut(), extra.as_object()) {
            p.extend(e.clone());
        }
        props
    };
    vec![
        ToolSpec {
            name: "send_email",
            aliases: &["email_send"],
            description: "Send a plain text email",
            category: ToolCategory::Email,
            parameters: json!({
                "type": "object",
                "properties": with(json!({"body": {"type": "string"}})),
                "required": ["to", "subject", "body"]
            }),
        },
        ToolSpec {
            name: "send_html_email",
            aliases: &[],
            description: "Send an HTML email",
            category: ToolCategory::Email,
            parameters: json!({
                "type": "object",
                "properties": with(json!({"html_body": {"type": "string"}})),
                "required": ["to", "subject", "html_body"]
            }),
        },
        ToolSpec {
            name: "send_email_with_attachment",
            aliases: &["email_with_attachment"],
            description: "Send an email with one file attached",
            category: ToolCategory::Email,
            parameters: json!({
                "type": "object",
                "properties": with(json!({
                    "body": {"type": "string"},
                    "attachment_path": {"type": "string", "description": "Path of a local file"},
                    "attachment_base64": {"type": "string", "description": "File content, base64"},
                    "attachment_name": {"type": "string"}
                })),
                "required": ["to", "subject", "body"]
            }),
        },
        ToolSpec {
            name: "create_draft",
            aliases: &["create_email_draft"],
            description: "Save an email as a draft",
            category: ToolCategory::Email,
            parameters: json!({
                "type": "object",
                "properties": with(json!({"body": {"type": "string"}})),
                "required": ["to", "subject", "body"]
            }),
        },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

/// An outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: String,
    pub body: String,
    pub html: bool,
    pub attachment: Option<Attachment>,
}

impl Email {
    fn from_params(params: &Value, body_key: &str, html: bool) -> Result<Self, ToolError> {
        let to = required_str(params, "to")?.trim().to_string();
        let cc = optional_str(params, "cc").map(str::to_string);
        let bcc = optional_str(params, "bcc").map(str::to_string);
        for address in std::iter::once(to.as_str())
            .chain(cc.iter().flat_map(|c| c.split(',')))
            .chain(bcc.iter().flat_map(|b| b.split(',')))
        {
            if !is_valid_address(address) {
                return Err(ToolError::InvalidParameters(format!(
                    "Invalid recipient email: {}",
                    address.trim()
                )));
            }
        }
        Ok(Self {
            to,
            cc,
            bcc,
            subject: required_str(params, "subject")?.to_string(),
            body: params[body_key]
                .as_str()
                .ok_or_else(|| ToolError::InvalidParameters(format!("{body_key} is required")))?
                .to_string(),
            html,
            attachment: None,
        })
    }

    /// RFC 2822 rendering.
    pub fn to_mime(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("To: {}\r\n", self.to));
        if let Some(cc) = &self.cc {
            out.push_str(&format!("Cc: {cc}\r\n"));
        }
        if let Some(bcc) = &self.bcc {
            out.push_str(&format!("Bcc: {bcc}\r\n"));
        }
        out.push_str(&format!("Subject: {}\r\n", encode_header(&self.subject)));
        out.push_str("MIME-Version: 1.0\r\n");

        let subtype = if self.html { "html" } else { "plain" };
        let text_part = format!(
            "Content-Type: text/{subtype}; charset=\"UTF-8\"\r\nContent-Transfer-Encoding: base64\r\n\r\n{}\r\n",
            wrap_base64(&STANDARD.encode(&self.body))
        );

        match &self.attachment {
            None => out.push_str(&text_part),
            Some(att) => {
                let boundary = format!("hub_{}", uuid::Uuid::new_v4().simple());
                out.push_str(&format!(
                    "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
                ));
                out.push_str(&format!("--{boundary}\r\n{text_part}"));
                out.push_str(&format!(
                    "--{boundary}\r\nContent-Type: application/octet-stream\r\n\
                     Content-Transfer-Encoding: base64\r\n\
                     Content-Disposition: attachment; filename=\"{}\"\r\n\r\n{}\r\n",
                    att.filename.replace('"', ""),
                    wrap_base64(&STANDARD.encode(&att.data))
                ));
                out.push_str(&format!("--{boundary}--\r\n"));
            }
        }
        out
    }

    fn raw(&self) -> String {
        URL_SAFE.encode(self.to_mime())
    }

    fn summary(&self) -> Value {
        json!({
            "to": self.to,
            "cc": self.cc,
            "bcc": self.bcc,
            "subject": self.subject,
            "body_length": self.body.chars().count(),
            "is_html": self.html,
            "attachment": self.attachment.as_ref().map(|a| a.filename.clone()),
        })
    }
}

pub fn is_valid_address(address: &str) -> bool {
    EMAIL_RE.is_match(address.trim())
}

/// RFC 2047 encoding for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value))
    }
}

fn wrap_base64(encoded: &str) -> String {
    encoded
        .as_bytes()
        .chunks(76)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}

pub struct GmailHandler {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    api_url: String,
}

impl GmailHandler {
    pub fn new(credentials: Arc<CredentialStore>) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            credentials,
            api_url: GMAIL_API.to_string(),
        })
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ToolError> {
        let url = format!("{}/users/me/{path}", self.api_url);
        let request = self
            .credentials
            .apply(Service::Google, self.http.post(url).json(&body))
            .await?;
        check_response(request.send().await?).await
    }

    async fn send(&self, email: &Email) -> Result<Value, ToolError> {
        let sent = self.post("messages/send", json!({"raw": email.raw()})).await?;
        info!("Email sent to {}: {}", email.to, email.subject);
        let mut message = email.summary();
        message["id"] = sent["id"].clone();
        message["sent_at"] = json!(Utc::now().to_rfc3339());
        Ok(json!({"success": true, "message": message}))
    }

    async fn draft(&self, email: &Email) -> Result<Value, ToolError> {
        let created = self
            .post("drafts", json!({"message": {"raw": email.raw()}}))
            .await?;
        info!("Email draft created: {}", email.subject);
        let mut draft = email.summary();
        draft["id"] = created["id"].clone();
        draft["status"] = json!("draft");
        draft["created_at"] = json!(Utc::now().to_rfc3339());
        Ok(json!({"success": true, "draft": draft}))
    }

    async fn attachment(params: &Value) -> Result<Attachment, ToolError> {
        if let Some(encoded) = optional_str(params, "attachment_base64") {
            let data = STANDARD
                .decode(encoded.trim())
                .map_err(|e| ToolError::InvalidParameters(format!("attachment_base64: {e}")))?;
            let filename = optional_str(params, "attachment_name")
                .unwrap_or("attachment")
                .to_string();
            return Ok(Attachment { filename, data });
        }

        let path = optional_str(params, "attachment_path").ok_or_else(|| {
            ToolError::InvalidParameters("attachment_path or attachment_base64 is required".into())
        })?;
        let data = tokio::fs::read(path)
            .await
            .map_err(|_| ToolError::ExecutionFailed(format!("Attachment file not found: {path}")))?;
        let filename = optional_str(params, "attachment_name")
            .map(str::to_string)
            .or_else(|| {
                Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Attachment { filename, data })
    }
}

#[async_trait]
impl ToolHandler for GmailHandler {
    fn server(&self) -> &'static str {
        "email"
    }

    fn specs(&self) -> Vec<ToolSpec> {
        specs()
    }

    fn credentials(&self) -> Option<Service> {
        Some(Service::Google)
    }

    async fn call(&self, tool: &str, params: &Value) -> Result<Value, ToolError> {
        match tool {
            "send_email" => self.send(&Email::from_params(params, "body", false)?).await,
            "send_html_email" => {
                self.send(&Email::from_params(params, "html_body", true)?)
                    .await
            }
            "send_email_with_attachment" => {
                let mut email = Email::from_params(params, "body", false)?;
                email.attachment = Some(Self::attachment(params).await?);
                self.send(&email).await
            }
            "create_draft" => self.draft(&Email::from_params(params, "body", false)?).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}
