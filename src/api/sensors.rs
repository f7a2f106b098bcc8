use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::models::FeedRecord;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_sensors))
        .route("/:id", get(get_sensor))
}

#[derive(Serialize)]
pub struct SensorView {
    pub id: String,
    pub name: String,
    /// Entity count before truncation; 0 while unavailable.
    pub state: usize,
    pub available: bool,
    pub attributes: SensorAttributes,
}

#[derive(Serialize)]
pub struct SensorAttributes {
    pub data: Vec<FeedRecord>,
}

async fn view_of(handle: &crate::sensor::SensorHandle) -> SensorView {
    let result = handle.result.read().await.clone();
    SensorView {
        id: handle.id.clone(),
        name: handle.name.clone(),
        state: result.state,
        available: result.available,
        attributes: SensorAttributes { data: result.data },
    }
}

async fn list_sensors(State(state): State<Arc<AppState>>) -> Json<Vec<SensorView>> {
    let mut views = Vec::with_capacity(state.sensors.len());
    for handle in &state.sensors {
        views.push(view_of(handle).await);
    }
    Json(views)
}

async fn get_sensor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SensorView>, (StatusCode, Json<Value>)> {
    match state.sensors.iter().find(|h| h.id == id) {
        Some(handle) => Ok(Json(view_of(handle).await)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown sensor '{}'", id) })),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CycleResult;
    use crate::sensor::SensorHandle;
    use serde_json::json;
    use tokio::sync::RwLock;

    async fn spawn_api(sensors: Vec<SensorHandle>) -> String {
        let state = Arc::new(AppState { sensors });
        let app = crate::api::routes().with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn handle(id: &str, result: CycleResult) -> SensorHandle {
        SensorHandle {
            id: id.to_string(),
            name: format!("{} Mediarr", id),
            result: Arc::new(RwLock::new(result)),
        }
    }

    #[tokio::test]
    async fn test_list_and_get_sensor() {
        let mut record = FeedRecord::new();
        record.insert("title".into(), json!("Some Movie"));
        let result = CycleResult {
            state: 3,
            data: vec![record],
            available: true,
        };
        let base = spawn_api(vec![
            handle("radarr", result),
            handle("sonarr", CycleResult::unavailable()),
        ])
        .await;

        let list: Value = reqwest::get(format!("{}/Sensors", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.as_array().unwrap().len(), 2);

        let one: Value = reqwest::get(format!("{}/Sensors/radarr", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(one["state"], 3);
        assert_eq!(one["available"], true);
        assert_eq!(one["attributes"]["data"][0]["title"], "Some Movie");

        let unavailable: Value = reqwest::get(format!("{}/Sensors/sonarr", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(unavailable["state"], 0);
        assert_eq!(unavailable["available"], false);
    }

    #[tokio::test]
    async fn test_unknown_sensor_is_404() {
        let base = spawn_api(Vec::new()).await;
        let response = reqwest::get(format!("{}/Sensors/nope", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
