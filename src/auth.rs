//! Bearer-token authentication restricted to the company email domain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{AuthConfig, Config};

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Account {0} is not part of the company domain")]
    DomainNotAllowed(String),

    #[error("Admin access required")]
    AdminRequired,

    #[error("Identity provider error: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Verifies Firebase ID tokens through the Identity Toolkit REST API.
pub struct FirebaseVerifier {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FirebaseVerifier {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: IDENTITY_TOOLKIT_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let url = format!(
            "{}/accounts:lookup?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&json!({ "idToken": token }))
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            debug!("Token lookup rejected ({status}): {body}");
            return Err(AuthError::InvalidToken(format!("rejected by provider ({status})")));
        }
        if !status.is_success() {
            return Err(AuthError::Provider(format!("token lookup failed ({status})")));
        }

        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        let user = lookup
            .users
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::InvalidToken("unknown user".into()))?;
        Ok(Identity {
            uid: user.local_id,
            email: user.email.unwrap_or_default(),
        })
    }
}

/// Test-mode verifier: a token `dev:<email>` authenticates as that email.
pub struct DevVerifier;

#[async_trait]
impl IdentityVerifier for DevVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let email = token
            .strip_prefix("dev:")
            .filter(|e| e.contains('@'))
            .ok_or_else(|| AuthError::InvalidToken("expected dev:<email>".into()))?;
        Ok(Identity {
            uid: email.to_string(),
            email: email.to_string(),
        })
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Domain and admin policy.
#[derive(Debug, Clone)]
pub struct Gate {
    company_domain: String,
    admin_emails: Vec<String>,
}

impl Gate {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            company_domain: config.company_domain.trim_start_matches('@').to_lowercase(),
            admin_emails: config.admin_emails.iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    pub fn is_company_member(&self, identity: &Identity) -> bool {
        identity
            .email
            .to_lowercase()
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain == self.company_domain)
    }

    pub fn check(&self, identity: &Identity) -> Result<(), AuthError> {
        if self.is_company_member(identity) {
            Ok(())
        } else {
            warn!("Rejected account outside company domain: {}", identity.email);
            Err(AuthError::DomainNotAllowed(identity.email.clone()))
        }
    }

    /// Listed admins, or any company member when no admins are listed.
    pub fn is_admin(&self, identity: &Identity) -> bool {
        if !self.is_company_member(identity) {
            return false;
        }
        self.admin_emails.is_empty() || self.admin_emails.contains(&identity.email.to_lowercase())
    }

    pub fn require_admin(&self, identity: &Identity) -> Result<(), AuthError> {
        if self.is_admin(identity) {
            Ok(())
        } else {
            Err(AuthError::AdminRequired)
        }
    }
}

/// Verifier plus gate, as used by every authenticated endpoint.
#[derive(Clone)]
pub struct Authenticator {
    verifier: Arc<dyn IdentityVerifier>,
    gate: Gate,
}

impl Authenticator {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, gate: Gate) -> Self {
        Self { verifier, gate }
    }

    /// Dev tokens in test mode, Firebase otherwise.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let verifier: Arc<dyn IdentityVerifier> = if config.is_test_mode() {
            Arc::new(DevVerifier)
        } else {
            let key = config
                .auth
                .firebase_api_key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("auth.firebase_api_key is required in production mode"))?;
            Arc::new(FirebaseVerifier::new(key)?)
        };
        Ok(Self::new(verifier, Gate::new(&config.auth)))
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Verify the request's bearer token and the company domain.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = bearer_token(headers)?;
        let identity = self.verifier.verify(token).await?;
        self.gate.check(&identity)?;
        debug!("Authenticated {}", identity.email);
        Ok(identity)
    }

    pub async fn authenticate_admin(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let identity = self.authenticate(headers).await?;
        self.gate.require_admin(&identity)?;
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::routing::post;
    use axum::{Json, Router};

    fn gate(admins: &[&str]) -> Gate {
        Gate::new(&AuthConfig {
            company_domain: "positiveit.com.ar".into(),
            admin_emails: admins.iter().map(|s| s.to_string()).collect(),
            firebase_api_key: None,
        })
    }

    fn identity(email: &str) -> Identity {
        Identity {
            uid: "u".into(),
            email: email.into(),
        }
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AuthError::MissingToken)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok123"));
        assert_eq!(bearer_token(&headers).unwrap(), "tok123");
    }

    #[test]
    fn test_domain_gate() {
        let g = gate(&[]);
        assert!(g.check(&identity("ana@positiveit.com.ar")).is_ok());
        assert!(g.check(&identity("Ana@PositiveIT.com.ar")).is_ok());
        assert!(g.check(&identity("ana@gmail.com")).is_err());
        assert!(g.check(&identity("ana@evil-positiveit.com.ar")).is_err());
        assert!(g.check(&identity("")).is_err());
    }

    #[test]
    fn test_admin_rules() {
        let everyone = gate(&[]);
        assert!(everyone.is_admin(&identity("ana@positiveit.com.ar")));
        assert!(!everyone.is_admin(&identity("ana@gmail.com")));

        let listed = gate(&["boss@positiveit.com.ar"]);
        assert!(listed.is_admin(&identity("BOSS@positiveit.com.ar")));
        assert!(matches!(
            listed.require_admin(&identity("ana@positiveit.com.ar")),
            Err(AuthError::AdminRequired)
        ));
    }

    #[test]
    fn test_production_authenticator_needs_firebase_key() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        assert!(Authenticator::from_config(&config).is_err());

        config.auth.firebase_api_key = Some("key".into());
        assert!(Authenticator::from_config(&config).is_ok());

        config.auth.firebase_api_key = None;
        config.mode = crate::config::Mode::Test;
        assert!(Authenticator::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_dev_verifier() {
        let id = DevVerifier.verify("dev:ana@positiveit.com.ar").await.unwrap();
        assert_eq!(id.email, "ana@positiveit.com.ar");
        assert!(DevVerifier.verify("ana@positiveit.com.ar").await.is_err());
        assert!(DevVerifier.verify("dev:nobody").await.is_err());
    }

    #[tokio::test]
    async fn test_firebase_lookup() {
        let app = Router::new().route(
            "/:action",
            post(|Json(body): Json<serde_json::Value>| async move {
                if body["idToken"] == "good" {
                    (
                        axum::http::StatusCode::OK,
                        Json(json!({"users": [{"localId": "uid1", "email": "ana@positiveit.com.ar"}]})),
                    )
                } else {
                    (
                        axum::http::StatusCode::BAD_REQUEST,
                        Json(json!({"error": {"message": "INVALID_ID_TOKEN"}})),
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let verifier = FirebaseVerifier::new("k")
            .unwrap()
            .with_base_url(format!("http://{addr}"));
        let id = verifier.verify("good").await.unwrap();
        assert_eq!(id.uid, "uid1");
        assert!(matches!(
            verifier.verify("bad").await,
            Err(AuthError::InvalidToken(_))
        ));
    }
}
