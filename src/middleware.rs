//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::account::Account;
use crate::error::{Result, ServerError};
use crate::{AppState, router};

const BEARER: &str = "Bearer ";

/// Authentication middleware.
///
/// Decodes the bearer token and re-fetches the account so suspension or
/// deletion takes effect on the next request, not on token expiry.
pub async fn auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(ServerError::Unauthorized)?;
    let token = token.strip_prefix(BEARER).unwrap_or(token);

    let claims = state.token.decode(token)?;
    let account = router::fetch_live_account(&state, &claims.sub).await?;

    req.extensions_mut().insert::<Account>(account);
    Ok(next.run(req).await)
}
