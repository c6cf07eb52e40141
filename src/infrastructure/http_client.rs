// REST client for the dashboard persistence and widget data endpoints
use crate::application::dashboard_repository::DashboardRepository;
use crate::application::widget_data_source::WidgetDataSource;
use crate::domain::dashboard::{Dashboard, DashboardPatch, DashboardSummary, NewDashboard};
use crate::domain::error::{DashboardError, DashboardResult};
use crate::domain::ids::{DashboardId, WidgetId};
use crate::domain::widget::{NewWidget, Widget, WidgetKind, WidgetPatch, WidgetType};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpDashboardClient {
    base_url: String,
    client: reqwest::Client,
    max_series_points: usize,
}

fn network(error: reqwest::Error) -> DashboardError {
    if error.is_timeout() {
        DashboardError::Network(format!("request timed out: {}", error))
    } else {
        DashboardError::Network(error.to_string())
    }
}

impl HttpDashboardClient {
    pub fn new(base_url: &str, timeout: Duration, max_series_points: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            max_series_points,
        })
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn dashboard_url(&self, id: &DashboardId) -> String {
        self.url(&["dashboards", id.as_str()])
    }

    fn widget_url(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> String {
        self.url(&["dashboards", dashboard_id.as_str(), "widgets", widget_id.as_str()])
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        not_found: impl FnOnce() -> DashboardError,
    ) -> DashboardResult<reqwest::Response> {
        let response = request
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "dashboard API call failed");
            return Err(DashboardError::Network(format!("server answered {}: {}", status, body)));
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        not_found: impl FnOnce() -> DashboardError,
    ) -> DashboardResult<T> {
        self.execute(request, not_found)
            .await?
            .json::<T>()
            .await
            .map_err(|e| DashboardError::Network(format!("unreadable response: {}", e)))
    }
}

#[async_trait]
impl DashboardRepository for HttpDashboardClient {
    async fn list_dashboards(&self) -> DashboardResult<Vec<DashboardSummary>> {
        let url = self.url(&["dashboards"]);
        self.json(self.client.get(&url), || DashboardError::Network(format!("{} is missing", url)))
            .await
    }

    async fn get_dashboard(&self, id: &DashboardId) -> DashboardResult<Dashboard> {
        self.json(self.client.get(self.dashboard_url(id)), || DashboardError::dashboard_not_found(id))
            .await
    }

    async fn create_dashboard(&self, new: &NewDashboard) -> DashboardResult<Dashboard> {
        let url = self.url(&["dashboards"]);
        self.json(self.client.post(&url).json(new), || DashboardError::Network(format!("{} is missing", url)))
            .await
    }

    async fn update_dashboard(&self, id: &DashboardId, patch: &DashboardPatch) -> DashboardResult<Dashboard> {
        self.json(self.client.put(self.dashboard_url(id)).json(patch), || {
            DashboardError::dashboard_not_found(id)
        })
        .await
    }

    async fn delete_dashboard(&self, id: &DashboardId) -> DashboardResult<()> {
        self.execute(self.client.delete(self.dashboard_url(id)), || DashboardError::dashboard_not_found(id))
            .await
            .map(|_| ())
    }

    async fn create_widget(&self, dashboard_id: &DashboardId, new: &NewWidget) -> DashboardResult<Widget> {
        let url = self.url(&["dashboards", dashboard_id.as_str(), "widgets"]);
        self.json(self.client.post(url).json(new), || DashboardError::dashboard_not_found(dashboard_id))
            .await
    }

    async fn update_widget(
        &self,
        dashboard_id: &DashboardId,
        widget_id: &WidgetId,
        patch: &WidgetPatch,
    ) -> DashboardResult<Widget> {
        let url = self.widget_url(dashboard_id, widget_id);
        self.json(self.client.put(url).json(patch), || DashboardError::widget_not_found(widget_id))
            .await
    }

    async fn delete_widget(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> DashboardResult<()> {
        let url = self.widget_url(dashboard_id, widget_id);
        self.execute(self.client.delete(url), || DashboardError::widget_not_found(widget_id))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl WidgetDataSource for HttpDashboardClient {
    async fn fetch_widget_data(&self, dashboard_id: &DashboardId, widget: &Widget) -> DashboardResult<Value> {
        let config = serde_json::to_string(&widget.config)
            .map_err(|e| DashboardError::validation(format!("config is not serializable: {}", e)))?;
        let mut query = vec![
            ("dataSource", widget.data_source.clone()),
            ("config", config),
        ];
        if widget.kind == WidgetKind::Known(WidgetType::TimeSeries) {
            query.push(("maxPoints", self.max_series_points.to_string()));
        }

        tracing::debug!(dashboard_id = %dashboard_id, widget_id = %widget.id, "fetching widget data");
        let request = self
            .client
            .get(self.widget_url(dashboard_id, &widget.id))
            .query(&query);
        self.json(request, || DashboardError::widget_not_found(&widget.id))
            .await
    }
}
