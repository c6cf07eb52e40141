// Data-source trait - supplies the payload a widget displays
use crate::domain::error::DashboardResult;
use crate::domain::ids::DashboardId;
use crate::domain::widget::Widget;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait WidgetDataSource: Send + Sync {
    /// `GET /dashboards/{id}/widgets/{widgetId}`, honoring the widget's
    /// `dataSource` and `config`. The payload shape is checked by the
    /// registry, not here.
    async fn fetch_widget_data(&self, dashboard_id: &DashboardId, widget: &Widget) -> DashboardResult<Value>;
}
