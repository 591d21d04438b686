//! Error handler for clinica.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("identifier or password is incorrect")]
    InvalidCredentials,

    #[error("this account is inactive, contact an administrator")]
    AccountInactive,

    #[error("you are not allowed to perform this operation")]
    Forbidden,

    #[error("resource not found")]
    NotFound,

    #[error("{field} is already in use")]
    DuplicateIdentity { field: &'static str },

    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("{0}")]
    PreconditionFailed(&'static str),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("mail could not be delivered")]
    MailDelivery,

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response
                .title("There were validation errors with your request.")
                .errors(validation_errors),

            ServerError::Unauthorized => response
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::InvalidCredentials | ServerError::AccountInactive => {
                response
                    .title("Authentication failed.")
                    .status(StatusCode::UNAUTHORIZED)
            },

            ServerError::Forbidden => response
                .title("Operation not permitted.")
                .status(StatusCode::FORBIDDEN),

            // Covers resources hidden by tenant scoping too: the response
            // must be indistinguishable from a missing resource.
            ServerError::NotFound | ServerError::Sql(SQLxError::RowNotFound) => {
                response
                    .title("Resource not found.")
                    .details("resource not found")
                    .status(StatusCode::NOT_FOUND)
            },

            ServerError::DuplicateIdentity { .. } => response
                .title("Identity already taken.")
                .status(StatusCode::CONFLICT),

            ServerError::InvalidOrExpiredToken => {
                response.title("Invalid or expired token.")
            },

            ServerError::PreconditionFailed(_) => response
                .title("Operation precondition not met.")
                .status(StatusCode::PRECONDITION_FAILED),

            ServerError::MailDelivery => response
                .title("Mail delivery failed, try again later.")
                .status(StatusCode::BAD_GATEWAY),

            ServerError::Configuration(details) => {
                tracing::error!(%details, "server misconfigured");

                ResponseError::default()
            },

            ServerError::Sql(err) => {
                tracing::error!(err = %err, "database request failed");

                ResponseError::default()
            },

            ServerError::Crypto(err) => {
                tracing::error!(err = %err, "cryptographic operation failed");

                ResponseError::default()
            },

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },

            _ => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_identity_maps_to_conflict() {
        let response =
            ServerError::DuplicateIdentity { field: "email" }.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn tenant_miss_is_indistinguishable_from_absence() {
        let hidden = ServerError::NotFound.into_response();
        let absent = ServerError::Sql(SQLxError::RowNotFound).into_response();
        assert_eq!(hidden.status(), absent.status());
    }

    #[test]
    fn precondition_failure_maps_to_412() {
        let response =
            ServerError::PreconditionFailed("logical deletion required")
                .into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    }
}
