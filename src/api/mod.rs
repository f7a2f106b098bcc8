use axum::Router;
use std::sync::Arc;

use crate::AppState;

pub mod sensors;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().nest("/Sensors", sensors::routes())
}
