use axum::{
    extract::Request,
    http::{header::COOKIE, HeaderMap},
    middleware::Next,
    response::Response,
};

use super::error::ApiError;

pub const SESSION_COOKIE: &str = "intelscan_session";

/// Value of the session cookie, if present and non-empty. The token itself
/// is opaque here; issuing and verifying it belongs to the fronting app.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name.trim() == SESSION_COOKIE).then(|| value.trim().trim_matches('"').to_string())
        })
        .find(|v| !v.is_empty())
}

pub async fn require_session(request: Request, next: Next) -> Result<Response, ApiError> {
    if session_token(request.headers()).is_none() {
        return Err(ApiError::unauthorized("a valid session is required"));
    }
    Ok(next.run(request).await)
}
