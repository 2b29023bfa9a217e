//! Error type returned by the HTTP layer and the chat/agent services.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use crate::prompt::PromptError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Db(_) | AppError::Prompt(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to end users in the chat window.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "Tu sesión expiró. Por favor, vuelve a iniciar sesión.",
            AppError::Forbidden(_) => "No tienes permiso para realizar esta acción.",
            AppError::NotFound(_) => "No se encontró el recurso solicitado.",
            AppError::BadRequest(_) => "La solicitud no es válida. Revisa los datos e intenta de nuevo.",
            AppError::Conflict(_) => "El recurso ya existe.",
            AppError::Db(_) | AppError::Prompt(_) | AppError::Internal(_) => {
                "Ocurrió un error inesperado. Por favor, intenta de nuevo más tarde."
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken(_) => AppError::Unauthorized,
            AuthError::DomainNotAllowed(_) => {
                AppError::Forbidden("Access restricted to company accounts".into())
            }
            AuthError::AdminRequired => AppError::Forbidden("Admin access required".into()),
            AuthError::Provider(e) => AppError::Internal(anyhow::anyhow!(e)),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Internal error: {self}");
            format!("Internal server error: {self}")
        } else {
            self.to_string()
        };
        (
            status,
            Json(serde_json::json!({
                "error": message,
                "userMessage": self.user_message(),
            })),
        )
            .into_response()
    }
}
