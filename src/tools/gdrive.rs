//! Google Drive, Docs and Sheets tools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::credentials::{CredentialStore, Service};
use super::{
    ToolCategory, ToolError, ToolHandler, ToolSpec, check_response, optional_str, optional_u64,
    required_str,
};

const FILE_FIELDS: &str = "id, name, webViewLink, createdTime, modifiedTime";
const LIST_FIELDS: &str =
    "nextPageToken, files(id, name, mimeType, webViewLink, createdTime, modifiedTime, size)";
const DEFAULT_LIMIT: u64 = 10;
const SHARE_ROLES: &[&str] = &["reader", "commenter", "writer"];

pub fn specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "create_document",
            aliases: &["gdrive_create_document"],
            description: "Create a Google Docs document",
            category: ToolCategory::GoogleDrive,
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "content": {"type": "string"},
                    "folder_id": {"type": "string"}
                },
                "required": ["title"]
            }),
        },
        ToolSpec {
            name: "create_spreadsheet",
            aliases: &["gdrive_create_spreadsheet"],
            description: "Create a Google Sheets spreadsheet",
            category: ToolCategory::GoogleDrive,
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "folder_id": {"type": "string"}
                },
                "required": ["title"]
            }),
        },
        ToolSpec {
            name: "read_document",
            aliases: &["gdrive_read_document"],
            description: "Read the text of a Google Docs document",
            category: ToolCategory::GoogleDrive,
            parameters: json!({
                "type": "object",
                "properties": {"document_id": {"type": "string"}},
                "required": ["document_id"]
            }),
        },
        ToolSpec {
            name: "update_document",
            aliases: &["gdrive_update_document"],
            description: "Replace or append the text of a Google Docs document",
            category: ToolCategory::GoogleDrive,
            parameters: json!({
                "type": "object",
                "properties": {
                    "document_id": {"type": "string"},
                    "content": {"type": "string"},
                    "append": {"type": "boolean"}
                },
                "required": ["document_id", "content"]
            }),
        },
        ToolSpec {
            name: "list_files",
            aliases: &["gdrive_list_files", "search_files"],
            description: "List or search Google Drive files",
            category: ToolCategory::GoogleDrive,
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Text contained in the file name"},
                    "limit": {"type": "integer"}
                }
            }),
        },
        ToolSpec {
            name: "share_file",
            aliases: &["gdrive_share_file"],
            description: "Share a Google Drive file with a user",
            category: ToolCategory::GoogleDrive,
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_id": {"type": "string"},
                    "email": {"type": "string"},
                    "role": {"type": "string", "enum": SHARE_ROLES}
                },
                "required": ["file_id", "email"]
            }),
        },
    ]
}

/// Google API roots; overridable for tests.
#[derive(Debug, Clone)]
pub struct GoogleApis {
    pub drive: String,
    pub docs: String,
    pub sheets: String,
}

impl Default for GoogleApis {
    fn default() -> Self {
        Self {
            drive: "https://www.googleapis.com/drive/v3".into(),
            docs: "https://docs.googleapis.com/v1".into(),
            sheets: "https://sheets.googleapis.com/v4".into(),
        }
    }
}

pub struct DriveHandler {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    apis: GoogleApis,
}

impl DriveHandler {
    pub fn new(credentials: Arc<CredentialStore>) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            credentials,
            apis: GoogleApis::default(),
        })
    }

    pub fn with_apis(mut self, apis: GoogleApis) -> Self {
        self.apis = apis;
        self
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ToolError> {
        let request = self.credentials.apply(Service::Google, request).await?;
        check_response(request.send().await?).await
    }

    async fn file_metadata(&self, id: &str) -> Result<Value, ToolError> {
        let url = format!("{}/files/{id}", self.apis.drive);
        self.send(self.http.get(url).query(&[("fields", FILE_FIELDS)]))
            .await
    }

    async fn move_to_folder(&self, id: &str, folder: Option<&str>) -> Result<(), ToolError> {
        if let Some(folder) = folder {
            let url = format!("{}/files/{id}", self.apis.drive);
            self.send(
                self.http
                    .patch(url)
                    .query(&[("addParents", folder), ("fields", "id, parents")])
                    .json(&json!({})),
            )
            .await?;
        }
        Ok(())
    }

    async fn batch_update(&self, document_id: &str, requests: Vec<Value>) -> Result<(), ToolError> {
        let url = format!("{}/documents/{document_id}:batchUpdate", self.apis.docs);
        self.send(self.http.post(url).json(&json!({"requests": requests})))
            .await?;
        Ok(())
    }

    async fn create_document(&self, params: &Value) -> Result<Value, ToolError> {
        let title = required_str(params, "title")?;
        let url = format!("{}/documents", self.apis.docs);
        let doc = self.send(self.http.post(url).json(&json!({"title": title}))).await?;
        let id = doc["documentId"]
            .as_str()
            .ok_or_else(|| ToolError::ExecutionFailed("Docs API returned no documentId".into()))?
            .to_string();

        if let Some(content) = optional_str(params, "content") {
            self.batch_update(&id, vec![insert_text(1, content)]).await?;
        }
        self.move_to_folder(&id, optional_str(params, "folder_id")).await?;

        let meta = self.file_metadata(&id).await?;
        info!("Created Google Doc: {title}");
        Ok(json!({"success": true, "document": file_view(&id, title, &meta)}))
    }

    async fn create_spreadsheet(&self, params: &Value) -> Result<Value, ToolError> {
        let title = required_str(params, "title")?;
        let url = format!("{}/spreadsheets", self.apis.sheets);
        let sheet = self
            .send(
                self.http
                    .post(url)
                    .query(&[("fields", "spreadsheetId")])
                    .json(&json!({"properties": {"title": title}})),
            )
            .await?;
        let id = sheet["spreadsheetId"]
            .as_str()
            .ok_or_else(|| ToolError::ExecutionFailed("Sheets API returned no spreadsheetId".into()))?
            .to_string();

        self.move_to_folder(&id, optional_str(params, "folder_id")).await?;
        let meta = self.file_metadata(&id).await?;
        info!("Created Google Sheet: {title}");
        Ok(json!({"success": true, "spreadsheet": file_view(&id, title, &meta)}))
    }

    async fn get_document(&self, document_id: &str) -> Result<Value, ToolError> {
        let url = format!("{}/documents/{document_id}", self.apis.docs);
        self.send(self.http.get(url)).await
    }

    async fn read_document(&self, document_id: &str) -> Result<Value, ToolError> {
        let document = self.get_document(document_id).await?;
        let meta = self.file_metadata(document_id).await?;
        let title = document["title"].as_str().unwrap_or("Untitled");
        let mut view = file_view(document_id, title, &meta);
        view["content"] = json!(document_text(&document).trim());
        Ok(json!({"success": true, "document": view}))
    }

    async fn update_document(&self, params: &Value) -> Result<Value, ToolError> {
        let document_id = required_str(params, "document_id")?;
        let content = params["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidParameters("content is required".into()))?;
        let append = params["append"].as_bool().unwrap_or(false);

        let document = self.get_document(document_id).await?;
        let end = body_end_index(&document);
        let requests = if append {
            vec![insert_text(end.saturating_sub(1).max(1), content)]
        } else if end > 2 {
            vec![
                json!({"deleteContentRange": {"range": {"startIndex": 1, "endIndex": end - 1}}}),
                insert_text(1, content),
            ]
        } else {
            vec![insert_text(1, content)]
        };
        self.batch_update(document_id, requests).await?;
        info!("Updated Google Doc: {document_id}");
        self.read_document(document_id).await
    }

    async fn list_files(&self, params: &Value) -> Result<Value, ToolError> {
        let limit = optional_u64(params, "limit").unwrap_or(DEFAULT_LIMIT).to_string();
        let mut q = "trashed=false".to_string();
        if let Some(query) = optional_str(params, "query") {
            q.push_str(&format!(" and name contains '{}'", query.replace('\'', "\\'")));
        }
        let url = format!("{}/files", self.apis.drive);
        let data = self
            .send(self.http.get(url).query(&[
                ("q", q.as_str()),
                ("pageSize", limit.as_str()),
                ("fields", LIST_FIELDS),
            ]))
            .await?;
        let files: Vec<Value> = data["files"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|f| {
                        json!({
                            "id": f["id"],
                            "name": f["name"],
                            "type": f["mimeType"],
                            "url": f["webViewLink"].as_str().unwrap_or_default(),
                            "created_time": f["createdTime"],
                            "modified_time": f["modifiedTime"],
                            "size": f.get("size").cloned().unwrap_or(json!(0)),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({"success": true, "count": files.len(), "files": files}))
    }

    async fn share_file(&self, params: &Value) -> Result<Value, ToolError> {
        let file_id = required_str(params, "file_id")?;
        let email = required_str(params, "email")?;
        let role = optional_str(params, "role").unwrap_or("reader");
        if !SHARE_ROLES.contains(&role) {
            return Err(ToolError::InvalidParameters(format!(
                "role must be one of {}",
                SHARE_ROLES.join(", ")
            )));
        }
        let url = format!("{}/files/{file_id}/permissions", self.apis.drive);
        self.send(
            self.http
                .post(url)
                .query(&[("sendNotificationEmail", "true")])
                .json(&json!({"type": "user", "role": role, "emailAddress": email})),
        )
        .await?;
        info!("Shared file {file_id} with {email}");
        Ok(json!({"success": true, "message": format!("File shared with {email} as {role}")}))
    }
}

fn insert_text(index: u64, text: &str) -> Value {
    json!({"insertText": {"location": {"index": index}, "text": text}})
}

fn file_view(id: &str, title: &str, meta: &Value) -> Value {
    json!({
        "id": id,
        "title": title,
        "url": meta["webViewLink"],
        "created_time": meta["createdTime"],
        "modified_time": meta["modifiedTime"],
    })
}

/// Concatenated text runs of a Docs document body.
pub fn document_text(document: &Value) -> String {
    let mut text = String::new();
    let Some(elements) = document["body"]["content"].as_array() else {
        return text;
    };
    for element in elements {
        let Some(runs) = element["paragraph"]["elements"].as_array() else {
            continue;
        };
        for run in runs {
            if let Some(s) = run["textRun"]["content"].as_str() {
                text.push_str(s);
            }
        }
    }
    text
}

fn body_end_index(document: &Value) -> u64 {
    document["body"]["content"]
        .as_array()
        .and_then(|c| c.last())
        .and_then(|last| last["endIndex"].as_u64())
        .unwrap_or(1)
}

#[async_trait]
impl ToolHandler for DriveHandler {
    fn server(&self) -> &'static str {
        "google_drive"
    }

    fn specs(&self) -> Vec<ToolSpec> {
        specs()
    }

    fn credentials(&self) -> Option<Service> {
        Some(Service::Google)
    }

    async fn call(&self, tool: &str, params: &Value) -> Result<Value, ToolError> {
        match tool {
            "create_document" => self.create_document(params).await,
            "create_spreadsheet" => self.create_spreadsheet(params).await,
            "read_document" => self.read_document(required_str(params, "document_id")?).await,
            "update_document" => self.update_document(params).await,
            "list_files" => self.list_files(params).await,
            "share_file" => self.share_file(params).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn doc() -> Value {
        json!({
            "title": "Minuta",
            "body": {"content": [
                {"endIndex": 1, "sectionBreak": {}},
                {"endIndex": 12, "paragraph": {"elements": [
                    {"textRun": {"content": "Hola "}},
                    {"textRun": {"content": "mundo\n"}}
                ]}}
            ]}
        })
    }

    #[test]
    fn test_document_text_and_end_index() {
        assert_eq!(document_text(&doc()), "Hola mundo\n");
        assert_eq!(body_end_index(&doc()), 12);
        assert_eq!(body_end_index(&json!({})), 1);
    }

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn serve(seen: Seen) -> String {
        let app = axum::Router::new()
            .route(
                "/docs/documents/:id",
                axum::routing::get(|| async { axum::Json(doc()) }).post(
                    move |axum::Json(body): axum::Json<Value>| {
                        let seen = seen.clone();
                        async move {
                            seen.lock().unwrap().push(body);
                            axum::Json(json!({}))
                        }
                    },
                ),
            )
            .route(
                "/drive/files/:id",
                axum::routing::get(|| async {
                    axum::Json(json!({"webViewLink": "https://docs.google.com/d/1", "createdTime": "t0", "modifiedTime": "t1"}))
                }),
            )
            .route(
                "/drive/files",
                axum::routing::get(
                    |axum::extract::Query(q): axum::extract::Query<HashMap<String, String>>| async move {
                        axum::Json(json!({"files": [{"id": "f1", "name": q["q"], "mimeType": "text/plain"}]}))
                    },
                ),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn handler(base: &str) -> DriveHandler {
        let creds = CredentialStore::from_lookup(|k| {
            (k == "GOOGLE_ACCESS_TOKEN").then(|| "ya29".to_string())
        })
        .unwrap();
        DriveHandler::new(Arc::new(creds)).unwrap().with_apis(GoogleApis {
            drive: format!("{base}/drive"),
            docs: format!("{base}/docs"),
            sheets: format!("{base}/sheets"),
        })
    }

    #[tokio::test]
    async fn test_read_document() {
        let base = serve(Arc::default()).await;
        let out = handler(&base)
            .call("read_document", &json!({"document_id": "1"}))
            .await
            .unwrap();
        assert_eq!(out["document"]["title"], "Minuta");
        assert_eq!(out["document"]["content"], "Hola mundo");
        assert_eq!(out["document"]["url"], "https://docs.google.com/d/1");
    }

    #[tokio::test]
    async fn test_update_document_replace_and_append() {
        let seen: Seen = Arc::default();
        let base = serve(seen.clone()).await;
        let h = handler(&base);

        h.call("update_document", &json!({"document_id": "1", "content": "Nuevo"}))
            .await
            .unwrap();
        h.call(
            "update_document",
            &json!({"document_id": "1", "content": "Fin", "append": true}),
        )
        .await
        .unwrap();

        let bodies = seen.lock().unwrap().clone();
        let replace = &bodies[0]["requests"];
        assert_eq!(replace[0]["deleteContentRange"]["range"]["endIndex"], 11);
        assert_eq!(replace[1]["insertText"]["location"]["index"], 1);
        let append = &bodies[1]["requests"];
        assert_eq!(append.as_array().unwrap().len(), 1);
        assert_eq!(append[0]["insertText"]["location"]["index"], 11);
    }

    #[tokio::test]
    async fn test_list_files_escapes_query() {
        let base = serve(Arc::default()).await;
        let out = handler(&base)
            .call("list_files", &json!({"query": "O'Brien"}))
            .await
            .unwrap();
        assert_eq!(out["files"][0]["name"], "trashed=false and name contains 'O\\'Brien'");
        assert_eq!(out["files"][0]["size"], 0);
    }

    #[tokio::test]
    async fn test_share_file_rejects_unknown_role() {
        let err = handler("http://127.0.0.1:1")
            .call("share_file", &json!({"file_id": "f", "email": "a@b.c", "role": "owner"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
