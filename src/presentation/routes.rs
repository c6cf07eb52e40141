// Route table for the dashboard API
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    add_widget, apply_preset, close_dashboard, commit_layout, create_dashboard, delete_dashboard,
    delete_widget, get_dashboard, health_check, list_dashboards, list_presets, preview_layout,
    refresh_widget, retry_widget, update_dashboard, update_widget, view_dashboard,
};
use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/dashboards", get(list_dashboards).post(create_dashboard))
        .route(
            "/dashboards/:id",
            get(get_dashboard).put(update_dashboard).delete(delete_dashboard),
        )
        .route("/dashboards/:id/close", post(close_dashboard))
        .route("/dashboards/:id/layout", put(commit_layout))
        .route("/dashboards/:id/layout/preview", post(preview_layout))
        .route("/dashboards/:id/view", get(view_dashboard))
        .route("/dashboards/:id/widgets", post(add_widget))
        .route(
            "/dashboards/:id/widgets/:widget_id",
            put(update_widget).delete(delete_widget),
        )
        .route("/dashboards/:id/widgets/:widget_id/retry", post(retry_widget))
        .route("/dashboards/:id/widgets/:widget_id/refresh", post(refresh_widget))
        .route("/dashboards/:id/presets/:preset_id", post(apply_preset))
        .route("/presets", get(list_presets))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dashboard_controller::DashboardController;
    use crate::application::data_fetcher::WidgetDataFetcher;
    use crate::application::preset_loader::PresetLoader;
    use crate::infrastructure::memory_store::MemoryDashboardStore;
    use crate::infrastructure::tracing_notifier::TracingNotifier;
    use reqwest::StatusCode;
    use serde_json::{Value, json};

    async fn spawn_app() -> String {
        let store = Arc::new(MemoryDashboardStore::new());
        let controller = DashboardController::new(
            store.clone(),
            WidgetDataFetcher::new(store),
            Arc::new(TracingNotifier),
        );
        let state = Arc::new(AppState {
            controller: Arc::new(controller),
            presets: Arc::new(PresetLoader::builtin().unwrap()),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_dashboard_lifecycle_over_http() {
        let base = spawn_app().await;
        let http = reqwest::Client::new();

        let created: Value = http
            .post(format!("{}/dashboards", base))
            .json(&json!({ "name": "Q3", "preset": "cash-flow" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["name"], "Q3");
        assert_eq!(created["widgets"].as_array().unwrap().len(), 3);

        let response = http
            .post(format!("{}/dashboards/{}/widgets", base, id))
            .json(&json!({
                "type": "TEXT", "title": "Notes", "dataSource": "notes",
                "positionX": 10, "positionY": 0, "sizeW": 4, "sizeH": 2
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let view: Vec<Value> = http
            .get(format!("{}/dashboards/{}/view", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view.len(), 3);

        let response = http
            .delete(format!("{}/dashboards/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = http
            .get(format!("{}/dashboards/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_presets_are_listed() {
        let base = spawn_app().await;
        let presets: Vec<Value> = reqwest::get(format!("{}/presets", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert!(presets.iter().any(|p| p["id"] == "finance-overview" && p["widgetCount"] == 6));
    }
}
