/// Credentials for the external services tools talk to.
///
/// Values are read from the process environment once, at construction.
/// OAuth access tokens are refreshed through Google's token endpoint when
/// they are missing or expired.
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{ToolError, check_response};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh a little before the provider's expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Lifetime assumed for an access token whose expiry is unknown.
const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Github,
    Jira,
    Google,
    Serp,
}

impl Service {
    pub const ALL: [Service; 4] = [Service::Github, Service::Jira, Service::Google, Service::Serp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Github => "github",
            Service::Jira => "jira",
            Service::Google => "google",
            Service::Serp => "serp",
        }
    }

    /// Environment variables consulted for this service.
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            Service::Github => &["GITHUB_TOKEN", "GITHUB_API_URL"],
            Service::Jira => &["JIRA_USERNAME", "JIRA_API_TOKEN", "JIRA_URL"],
            Service::Google => &[
                "GOOGLE_CLIENT_ID",
                "GOOGLE_CLIENT_SECRET",
                "GOOGLE_REFRESH_TOKEN",
                "GOOGLE_ACCESS_TOKEN",
            ],
            Service::Serp => &["SERP_API_KEY"],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Secret {
    ApiKey(String),
    OAuth {
        access_token: Option<String>,
        refresh_token: String,
        client_id: String,
        client_secret: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

impl Secret {
    fn kind(&self) -> &'static str {
        match self {
            Secret::ApiKey(_) => "api_key",
            Secret::OAuth { .. } => "oauth",
            Secret::Basic { .. } => "basic",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub service: Service,
    pub secret: Secret,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Value of the `Authorization` header, when one can be built without
    /// a network round trip.
    pub fn authorization(&self) -> Option<String> {
        match &self.secret {
            Secret::ApiKey(key) => Some(format!("Bearer {key}")),
            Secret::OAuth { access_token, .. } => access_token
                .as_ref()
                .filter(|_| !self.is_expired())
                .map(|t| format!("Bearer {t}")),
            Secret::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                Some(format!("Basic {encoded}"))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub available: bool,
    #[serde(rename = "type")]
    pub kind: Option<&'static str>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_expired: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ACCESS_TOKEN_TTL_SECS
}

pub struct CredentialStore {
    vars: HashMap<String, String>,
    cache: Mutex<HashMap<Service, Credentials>>,
    http: reqwest::Client,
    token_url: String,
}

impl CredentialStore {
    /// Environment values, with `tools.serp_api_key` and `tools.jira_url`
    /// from the config file taking precedence.
    pub fn from_config(config: &crate::config::ToolsConfig) -> Result<Self, ToolError> {
        let serp = config.serp_api_key.clone();
        let jira_url = config.jira_url.clone();
        Self::from_lookup(move |key| match key {
            "SERP_API_KEY" if serp.is_some() => serp.clone(),
            "JIRA_URL" if jira_url.is_some() => jira_url.clone(),
            _ => std::env::var(key).ok(),
        })
    }

    /// Build from an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ToolError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Service::ALL
            .iter()
            .flat_map(|s| s.env_vars().iter())
            .filter_map(|key| {
                lookup(key)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (key.to_string(), v))
            })
            .collect();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            vars,
            cache: Mutex::new(HashMap::new()),
            http,
            token_url: GOOGLE_TOKEN_URL.to_string(),
        })
    }

    /// Point OAuth refreshes at another token endpoint.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Raw configuration value such as `JIRA_URL` or `GITHUB_API_URL`.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn load(&self, service: Service) -> Option<Credentials> {
        let var = |k: &str| self.vars.get(k).cloned();
        let secret = match service {
            Service::Github => Secret::ApiKey(var("GITHUB_TOKEN")?),
            Service::Serp => Secret::ApiKey(var("SERP_API_KEY")?),
            Service::Jira => Secret::Basic {
                username: var("JIRA_USERNAME")?,
                password: var("JIRA_API_TOKEN")?,
            },
            Service::Google => {
                let oauth = (
                    var("GOOGLE_CLIENT_ID"),
                    var("GOOGLE_CLIENT_SECRET"),
                    var("GOOGLE_REFRESH_TOKEN"),
                );
                match oauth {
                    (Some(client_id), Some(client_secret), Some(refresh_token)) => Secret::OAuth {
                        access_token: var("GOOGLE_ACCESS_TOKEN"),
                        refresh_token,
                        client_id,
                        client_secret,
                    },
                    _ => Secret::ApiKey(var("GOOGLE_ACCESS_TOKEN")?),
                }
            }
        };
        let created_at = Utc::now();
        let expires_at = matches!(secret, Secret::OAuth { .. }).then(|| {
            created_at + chrono::Duration::seconds(ACCESS_TOKEN_TTL_SECS - EXPIRY_MARGIN_SECS)
        });
        Some(Credentials {
            service,
            secret,
            created_at,
            expires_at,
        })
    }

    /// Credentials for `service`, from cache or the environment snapshot.
    pub async fn get(&self, service: Service) -> Option<Credentials> {
        let mut cache = self.cache.lock().await;
        if let Some(creds) = cache.get(&service) {
            let refreshable = matches!(creds.secret, Secret::OAuth { .. });
            if !creds.is_expired() || refreshable {
                return Some(creds.clone());
            }
            warn!("Cached credentials for {} are expired", service.as_str());
        }
        let creds = self.load(service)?;
        info!("Loaded credentials for {}", service.as_str());
        cache.insert(service, creds.clone());
        Some(creds)
    }

    pub fn has(&self, service: Service) -> bool {
        self.load(service).is_some()
    }

    /// Add authentication for `service` to a request, refreshing OAuth
    /// tokens as needed.
    pub async fn apply(
        &self,
        service: Service,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, ToolError> {
        let creds = self
            .get(service)
            .await
            .ok_or(ToolError::NotConfigured(service.as_str()))?;

        if service == Service::Serp {
            if let Secret::ApiKey(key) = &creds.secret {
                return Ok(request.query(&[("api_key", key.as_str())]));
            }
        }

        let header = match creds.authorization() {
            Some(h) => h,
            None => self.refresh(service).await?,
        };
        Ok(request.header(reqwest::header::AUTHORIZATION, header))
    }

    /// Exchange the refresh token for a new access token; returns the new
    /// `Authorization` header value.
    pub async fn refresh(&self, service: Service) -> Result<String, ToolError> {
        let creds = self
            .get(service)
            .await
            .ok_or(ToolError::NotConfigured(service.as_str()))?;
        let Secret::OAuth {
            refresh_token,
            client_id,
            client_secret,
            ..
        } = &creds.secret
        else {
            return Err(ToolError::ExecutionFailed(format!(
                "{} credentials cannot be refreshed",
                service.as_str()
            )));
        };

        info!("Refreshing OAuth token for {}", service.as_str());
        let form = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let body = check_response(response).await?;
        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| ToolError::ExecutionFailed(format!("invalid token response: {e}")))?;

        let updated = Credentials {
            secret: Secret::OAuth {
                access_token: Some(token.access_token.clone()),
                refresh_token: refresh_token.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            },
            expires_at: Some(
                Utc::now() + chrono::Duration::seconds(token.expires_in - EXPIRY_MARGIN_SECS),
            ),
            ..creds
        };
        self.cache.lock().await.insert(service, updated);
        Ok(format!("Bearer {}", token.access_token))
    }

    pub async fn clear_cache(&self, service: Option<Service>) {
        let mut cache = self.cache.lock().await;
        match service {
            Some(s) => {
                cache.remove(&s);
                info!("Cleared credentials cache for {}", s.as_str());
            }
            None => {
                cache.clear();
                info!("Cleared all credentials cache");
            }
        }
    }

    /// Availability of every known service.
    pub async fn status(&self) -> BTreeMap<&'static str, CredentialStatus> {
        let mut out = BTreeMap::new();
        for service in Service::ALL {
            let status = match self.get(service).await {
                Some(c) => CredentialStatus {
                    available: true,
                    kind: Some(c.secret.kind()),
                    expires_at: c.expires_at,
                    is_expired: Some(c.is_expired()),
                    created_at: Some(c.created_at),
                },
                None => CredentialStatus {
                    available: false,
                    kind: None,
                    expires_at: None,
                    is_expired: None,
                    created_at: None,
                },
            };
            out.insert(service.as_str(), status);
        }
        out
    }
}
