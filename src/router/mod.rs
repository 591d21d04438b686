//! HTTP surface.

pub mod accounts;
pub mod audit_logs;
pub mod login;
pub mod password;
pub mod status;

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::account::Account;
use crate::error::{Result, ServerError};
use crate::AppState;

/// JSON body extractor running shape validation before the handler.
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Re-fetch the token subject and check it is still allowed in.
///
/// A vanished, suspended or deleted account is refused exactly like a bad
/// token.
pub(crate) async fn fetch_live_account(
    state: &AppState,
    account_id: &str,
) -> Result<Account> {
    let Some(account) = state.service.get(account_id).await? else {
        return Err(ServerError::Unauthorized);
    };
    if !account.can_authenticate() {
        return Err(ServerError::Unauthorized);
    }

    Ok(account)
}

/// In-memory application state for handler tests.
#[cfg(test)]
pub(crate) fn state() -> AppState {
    use std::sync::Arc;

    use crate::account::AccountService;
    use crate::config::{Argon2, Configuration, Reset};
    use crate::crypto::Crypto;
    use crate::database::Database;
    use crate::mail::MailManager;
    use crate::token::TokenManager;

    let db = Database::in_memory();
    let crypto = Arc::new(
        Crypto::new(
            Some(Argon2 {
                memory_cost: 1024,
                iterations: 1,
                parallelism: 1,
                hash_length: 32,
            }),
            30,
        )
        .expect("argon2 parameters are valid"),
    );
    let reset = Reset {
        token_ttl_minutes: 30,
        reveal_token: true,
        frontend_url: Some("https://clinic.test".into()),
    };
    let mail = MailManager::default();
    let service = AccountService::new(
        Arc::clone(&db.accounts),
        db.audit.clone(),
        Arc::clone(&crypto),
        mail.clone(),
        reset.clone(),
    );

    AppState {
        config: Arc::new(Configuration::default()),
        db,
        crypto,
        token: TokenManager::new("clinica.test", "handler-test-secret", None)
            .expect("secret is not a placeholder"),
        mail,
        service,
    }
}
