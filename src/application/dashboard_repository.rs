// Repository trait for the remote dashboard persistence boundary
use crate::domain::dashboard::{Dashboard, DashboardPatch, DashboardSummary, NewDashboard};
use crate::domain::error::DashboardResult;
use crate::domain::ids::{DashboardId, WidgetId};
use crate::domain::widget::{NewWidget, Widget, WidgetPatch};
use async_trait::async_trait;

#[async_trait]
pub trait DashboardRepository: Send + Sync {
    /// `GET /dashboards`
    async fn list_dashboards(&self) -> DashboardResult<Vec<DashboardSummary>>;

    /// `GET /dashboards/{id}`, widgets included
    async fn get_dashboard(&self, id: &DashboardId) -> DashboardResult<Dashboard>;

    /// `POST /dashboards`
    async fn create_dashboard(&self, new: &NewDashboard) -> DashboardResult<Dashboard>;

    /// `PUT /dashboards/{id}`
    async fn update_dashboard(&self, id: &DashboardId, patch: &DashboardPatch) -> DashboardResult<Dashboard>;

    /// `DELETE /dashboards/{id}`; the server drops the widgets with it
    async fn delete_dashboard(&self, id: &DashboardId) -> DashboardResult<()>;

    /// `POST /dashboards/{id}/widgets`; the server assigns the widget id
    async fn create_widget(&self, dashboard_id: &DashboardId, new: &NewWidget) -> DashboardResult<Widget>;

    /// `PUT /dashboards/{id}/widgets/{widgetId}`
    async fn update_widget(
        &self,
        dashboard_id: &DashboardId,
        widget_id: &WidgetId,
        patch: &WidgetPatch,
    ) -> DashboardResult<Widget>;

    /// `DELETE /dashboards/{id}/widgets/{widgetId}`
    async fn delete_widget(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> DashboardResult<()>;
}
