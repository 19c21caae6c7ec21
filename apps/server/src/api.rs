use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::{Value, json};
use token::TokenError;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use crate::AppState;

pub const SERVICE_NAME: &str = "Privex SteemEngine Token Image Proxy";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/token/:symbol", get(token_data))
        .route("/token/:symbol/icon", get(token_icon))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "error": false,
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn token_data(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, RestError> {
    let token = state.tokens.get(&symbol).await?;
    Ok(Json(json!({ "error": false, "result": token })))
}

async fn token_icon(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Response, RestError> {
    let token = state.tokens.get(&symbol).await?;
    let icon = state.icons.fetch(&token).await?;
    info!(symbol = %token.symbol, mime = %icon.mime, "streaming icon");

    let headers = [
        (
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", icon.file_name()),
        ),
        (header::CONTENT_TYPE, icon.mime),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(icon.file))).into_response())
}

pub struct RestError(TokenError);

impl From<TokenError> for RestError {
    fn from(err: TokenError) -> Self {
        Self(err)
    }
}

impl RestError {
    pub fn to_status_and_message(&self) -> (StatusCode, String) {
        match &self.0 {
            TokenError::SymbolTooLong | TokenError::NotFound(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            TokenError::IconMissing(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            TokenError::IconFetch(_) => (
                StatusCode::BAD_GATEWAY,
                "Could not download the token icon".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error while processing the request".to_string(),
            ),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: bool,
    message: String,
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let (status, message) = self.to_status_and_message();

        if status.is_server_error() {
            error!(error = ?self.0, %status, "request failed");
        } else {
            debug!(error = %self.0, %status, "request rejected");
        }

        (
            status,
            Json(ErrorBody {
                error: true,
                message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_errors_are_bad_requests() {
        let (status, message) = RestError(TokenError::SymbolTooLong).to_status_and_message();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "Symbol is too long. Refusing to look up.");

        let (status, message) =
            RestError(TokenError::NotFound("NOPE".to_string())).to_status_and_message();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "Symbol 'NOPE' was not found on SteemEngine.");
    }

    #[test]
    fn internal_failures_hide_details() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/srv/static");
        let (status, message) = RestError(TokenError::Io(io)).to_status_and_message();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("/srv/static"));
    }

    #[test]
    fn missing_icon_is_not_found() {
        let (status, _) =
            RestError(TokenError::IconMissing("ENG".to_string())).to_status_and_message();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
