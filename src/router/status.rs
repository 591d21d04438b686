//! Public instance page for front-end identification.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::config::Configuration;

/// Public server status (configuration).
///
/// Secrets never appear here: the configuration type skips its sensitive
/// sections during serialization.
pub async fn status(State(state): State<AppState>) -> Json<Configuration> {
    Json((*state.config).clone())
}
