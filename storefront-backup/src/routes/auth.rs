use crate::error::AppError;
use crate::models::user::{self, User};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// `Authorization: Bearer <token>`, or `?token=<token>` for clients that
/// cannot set headers on a websocket upgrade.
fn request_token(request: &Request) -> Option<String> {
    let from_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let from_query = || {
        request
            .uri()
            .query()?
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
    };

    from_header
        .or_else(from_query)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolve the request's token to an active admin and attach the user to the
/// request extensions.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request_token(&request)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;

    let db = state.db.clone();
    let found = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        user::find_by_token(&conn, &token)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    let user: User = match found {
        Some(u) if u.active => u,
        Some(_) => return Err(AppError::Unauthorized("User is inactive".into())),
        None => return Err(AppError::Unauthorized("Invalid token".into())),
    };
    if !user.is_admin() {
        return Err(AppError::Forbidden("Admin access required".into()));
    }

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
