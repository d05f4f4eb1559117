use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::{
    api::state::AppState,
    auth::Claims,
    error::AppError,
};

#[derive(Clone)]
pub struct CurrentUser {
    pub claims: Claims,
}

/// Requires a valid `Authorization: Bearer <jwt>` header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let claims = state.service_context.auth_service.verify(token.trim())?;

    // Insert current user into request extensions
    request.extensions_mut().insert(CurrentUser { claims });

    Ok(next.run(request).await)
}
