//! Status mapping for the cloud REST APIs.

use cloudport_core::{Error, Result};
use reqwest::{Response, StatusCode};
use serde_json::Value;

/// Pass successful responses through; map failures onto error kinds.
pub(crate) async fn check(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => Error::NotFound(what.to_string()),
        StatusCode::CONFLICT => conflict(what, &body),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Authentication(format!("{what}: {status}: {body}"))
        }
        _ => Error::Network(format!("{what}: {status}: {body}")),
    })
}

/// A 409 only means "already exists" when the body says so. Google reports
/// `error.status = ALREADY_EXISTS`, ARM reports `error.code = AlreadyExists`.
fn conflict(what: &str, body: &str) -> Error {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = |pointer: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.pointer(pointer))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let exists = field("/error/status").as_deref() == Some("ALREADY_EXISTS")
        || field("/error/code").as_deref() == Some("AlreadyExists")
        || body.to_lowercase().contains("already exists");

    if exists {
        Error::AlreadyExists(format!("{what}: {body}"))
    } else {
        Error::Backend(format!("{what}: {}: {body}", StatusCode::CONFLICT))
    }
}

pub(crate) fn network(what: &str, e: reqwest::Error) -> Error {
    Error::Network(format!("{what}: {e}"))
}

/// Like [`check`], for OAuth2 token endpoints: any rejection is an authentication failure.
pub(crate) async fn check_grant(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::Authentication(format!("{what}: {status}: {body}")))
}
