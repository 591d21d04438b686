//! Clinica is a multi-tenant account manager for clinic back offices.

pub mod account;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
mod mail;
#[forbid(unsafe_code)]
#[deny(missing_docs, unused_mut)]
mod middleware;
pub mod policy;
pub mod router;
pub mod token;

pub use mail::MailManager;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{delete, get, post};
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    token: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request =
            request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub crypto: Arc<crypto::Crypto>,
    pub token: token::TokenManager,
    pub mail: mail::MailManager,
    pub service: account::AccountService,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    // Authorization required on every route below.
    let protected = Router::new()
        .route(
            "/accounts",
            post(router::accounts::provision).get(router::accounts::list),
        )
        .route(
            "/accounts/@me",
            get(router::accounts::get_me).patch(router::accounts::update_me),
        )
        .route(
            "/accounts/{account_id}",
            delete(router::accounts::soft_delete),
        )
        .route(
            "/accounts/{account_id}/status",
            post(router::accounts::set_status),
        )
        .route(
            "/accounts/{account_id}/purge",
            delete(router::accounts::purge),
        )
        .route(
            "/accounts/{account_id}/reissue",
            post(router::accounts::reissue),
        )
        .route(
            "/audit-logs",
            get(router::audit_logs::list).delete(router::audit_logs::purge),
        )
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        // password-reset flow, no authorization.
        .route("/password/forgot", post(router::password::forgot))
        .route("/password/reset/{token}", post(router::password::reset))
        .merge(protected)
        .with_state(state)
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let db = match config.postgres {
        Some(ref postgres) => database::Database::postgres(postgres).await?,
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, \
                 falling back to the volatile in-memory store"
            );
            database::Database::in_memory()
        },
    };

    let crypto = Arc::new(crypto::Crypto::new(
        config.argon2.clone(),
        config.reset.token_ttl_minutes,
    )?);

    // handle jwt.
    let Some(token) = &config.token else {
        return Err(Box::new(ServerError::Configuration(
            "missing `token` entry on `config.yaml` file".to_owned(),
        )));
    };
    let token = token::TokenManager::new(
        &config.url,
        &token.secret,
        token.lifetime_secs,
    )?;

    // handle mail sender.
    let mail = if let Some(cfg) = &config.mail {
        mail::MailManager::new(cfg).await?
    } else {
        mail::MailManager::default()
    };

    let service = account::AccountService::new(
        Arc::clone(&db.accounts),
        db.audit.clone(),
        Arc::clone(&crypto),
        mail.clone(),
        config.reset.clone(),
    );

    // seed the first administrator on an empty store.
    if let Some(bootstrap) = &config.bootstrap {
        service.ensure_system_admin(bootstrap).await?;
    }

    Ok(AppState {
        config,
        db,
        crypto,
        token,
        mail,
        service,
    })
}
