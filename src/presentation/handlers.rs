// HTTP request handlers
use crate::application::preset_loader::PresetSummary;
use crate::application::widget_registry::RenderedCell;
use crate::domain::dashboard::{Dashboard, DashboardPatch, DashboardSummary, NewDashboard};
use crate::domain::ids::{DashboardId, WidgetId};
use crate::domain::layout::{LayoutChange, Placement};
use crate::domain::widget::{NewWidget, Widget, WidgetPatch};
use crate::presentation::api_error::ApiResult;
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDashboardRequest {
    #[serde(flatten)]
    pub dashboard: NewDashboard,
    /// Seeds the new dashboard from this preset.
    #[serde(default)]
    pub preset: Option<String>,
}

#[derive(Deserialize)]
pub struct LayoutRequest {
    pub changes: Vec<LayoutChange>,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_dashboards(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<DashboardSummary>>> {
    Ok(Json(state.controller.list_dashboards().await?))
}

pub async fn create_dashboard(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateDashboardRequest>,
) -> ApiResult<(StatusCode, Json<Dashboard>)> {
    let dashboard = match request.preset {
        Some(preset_id) => {
            state
                .presets
                .seed_new_dashboard(&state.controller, &preset_id, Some(request.dashboard.name))
                .await?
        }
        None => state.controller.create_dashboard(request.dashboard).await?,
    };
    Ok((StatusCode::CREATED, Json(dashboard)))
}

/// Loads the dashboard, which also starts its widgets' data fetches.
pub async fn get_dashboard(
    Path(id): Path<DashboardId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Dashboard>> {
    Ok(Json(state.controller.get_dashboard(&id).await?))
}

pub async fn update_dashboard(
    Path(id): Path<DashboardId>,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<DashboardPatch>,
) -> ApiResult<Json<Dashboard>> {
    Ok(Json(state.controller.update_dashboard(&id, patch).await?))
}

pub async fn delete_dashboard(
    Path(id): Path<DashboardId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<StatusCode> {
    state.controller.delete_dashboard(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn commit_layout(
    Path(id): Path<DashboardId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<LayoutRequest>,
) -> ApiResult<Json<Vec<Widget>>> {
    Ok(Json(state.controller.commit_layout(&id, request.changes).await?))
}

pub async fn preview_layout(
    Path(id): Path<DashboardId>,
    State(state): State<Arc<AppState>>,
    Json(change): Json<LayoutChange>,
) -> ApiResult<Json<Vec<Placement>>> {
    Ok(Json(state.controller.preview_layout(&id, change).await?))
}

pub async fn add_widget(
    Path(id): Path<DashboardId>,
    State(state): State<Arc<AppState>>,
    Json(widget): Json<NewWidget>,
) -> ApiResult<(StatusCode, Json<Widget>)> {
    let widget = state.controller.add_widget(&id, widget).await?;
    Ok((StatusCode::CREATED, Json(widget)))
}

pub async fn update_widget(
    Path((id, widget_id)): Path<(DashboardId, WidgetId)>,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<WidgetPatch>,
) -> ApiResult<Json<Widget>> {
    Ok(Json(state.controller.update_widget(&id, &widget_id, patch).await?))
}

pub async fn delete_widget(
    Path((id, widget_id)): Path<(DashboardId, WidgetId)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<StatusCode> {
    state.controller.delete_widget(&id, &widget_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn retry_widget(
    Path((id, widget_id)): Path<(DashboardId, WidgetId)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<StatusCode> {
    state.controller.retry_widget(&id, &widget_id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn refresh_widget(
    Path((id, widget_id)): Path<(DashboardId, WidgetId)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<StatusCode> {
    state.controller.refresh_widget(&id, &widget_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// One cell per widget in layout order; a failing widget never fails the view.
pub async fn view_dashboard(
    Path(id): Path<DashboardId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<RenderedCell>>> {
    if state.controller.snapshot(&id).await.is_none() {
        state.controller.get_dashboard(&id).await?;
    }
    Ok(Json(state.controller.render(&id).await?))
}

pub async fn close_dashboard(
    Path(id): Path<DashboardId>,
    State(state): State<Arc<AppState>>,
) -> StatusCode {
    state.controller.close_dashboard(&id).await;
    StatusCode::NO_CONTENT
}

pub async fn list_presets(State(state): State<Arc<AppState>>) -> Json<Vec<PresetSummary>> {
    Json(state.presets.list())
}

pub async fn apply_preset(
    Path((id, preset_id)): Path<(DashboardId, String)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<Vec<Widget>>)> {
    let added = state
        .presets
        .apply_to_dashboard(&state.controller, &id, &preset_id)
        .await?;
    Ok((StatusCode::CREATED, Json(added)))
}
