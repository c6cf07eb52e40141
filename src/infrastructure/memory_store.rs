// In-process dashboard store and data source
use crate::application::dashboard_repository::DashboardRepository;
use crate::application::widget_data_source::WidgetDataSource;
use crate::application::widget_registry;
use crate::domain::dashboard::{Dashboard, DashboardPatch, DashboardSummary, NewDashboard};
use crate::domain::error::{DashboardError, DashboardResult};
use crate::domain::ids::{DashboardId, WidgetId};
use crate::domain::widget::{NewWidget, Widget, WidgetPatch, WidgetType};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_SERIES_POINTS: usize = 90;

#[derive(Default)]
struct StoreState {
    dashboards: Vec<Dashboard>,
    source_data: HashMap<String, Value>,
    widget_writes: usize,
}

impl StoreState {
    fn dashboard_mut(&mut self, id: &DashboardId) -> DashboardResult<&mut Dashboard> {
        self.dashboards
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or_else(|| DashboardError::dashboard_not_found(id))
    }

    fn clear_default_except(&mut self, id: &DashboardId) {
        for dashboard in self.dashboards.iter_mut().filter(|d| &d.id != id) {
            dashboard.is_default = false;
        }
    }
}

/// Keeps dashboards in memory and answers widget data requests with
/// generated payloads that satisfy each widget type's contract.
pub struct MemoryDashboardStore {
    state: Mutex<StoreState>,
    series_points: usize,
}

impl Default for MemoryDashboardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDashboardStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            series_points: DEFAULT_SERIES_POINTS,
        }
    }

    pub fn with_series_points(mut self, points: usize) -> Self {
        self.series_points = points.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serves `payload` verbatim for every widget bound to `data_source`.
    pub fn put_source_data(&self, data_source: impl Into<String>, payload: Value) {
        self.state().source_data.insert(data_source.into(), payload);
    }

    /// Number of widget create/update/delete calls served so far.
    pub fn write_count(&self) -> usize {
        self.state().widget_writes
    }

    fn synthesize(&self, widget_type: WidgetType, widget: &Widget) -> Value {
        // Vary the numbers per data source so widgets do not all look alike.
        let seed = widget.data_source.bytes().map(f64::from).sum::<f64>() % 97.0 + 1.0;
        match widget_type {
            WidgetType::Kpi => {
                let metric = widget
                    .config
                    .get("metric")
                    .and_then(Value::as_str)
                    .unwrap_or("total");
                json!({
                    "metrics": { metric: seed * 1250.0, "total": seed * 1250.0 },
                    "previous": { metric: seed * 1180.0, "total": seed * 1180.0 },
                })
            }
            WidgetType::Chart => json!({
                "labels": ["Jan", "Feb", "Mar", "Apr", "May", "Jun"],
                "series": [
                    { "name": widget.data_source, "values": (1..=6).map(|m| seed * f64::from(m) * 10.0).collect::<Vec<_>>() },
                ],
            }),
            WidgetType::Table => json!({
                "columns": ["date", "description", "amount"],
                "rows": [
                    ["2024-01-03", "Office rent", -seed * 20.0],
                    ["2024-01-05", "Client payment", seed * 55.0],
                    ["2024-01-09", "Software licences", -seed * 4.0],
                ],
            }),
            WidgetType::Text => json!({ "content": format!("{} ({})", widget.title, widget.data_source) }),
            WidgetType::Gauge => json!({ "value": seed.min(100.0), "max": 100.0 }),
            WidgetType::Heatmap => json!({
                "xLabels": ["Mon", "Tue", "Wed", "Thu", "Fri"],
                "yLabels": ["Groceries", "Dining", "Transport"],
                "values": (1..=3)
                    .map(|row| (1..=5).map(|col| seed * f64::from(row * col)).collect::<Vec<_>>())
                    .collect::<Vec<_>>(),
            }),
            WidgetType::TimeSeries => {
                let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
                let points: Vec<Value> = (0..self.series_points)
                    .map(|day| {
                        let t = start + Duration::days(day as i64);
                        json!({ "t": t.timestamp_millis(), "v": seed + (day % 7) as f64 })
                    })
                    .collect();
                json!({ "points": points })
            }
        }
    }
}

#[async_trait]
impl DashboardRepository for MemoryDashboardStore {
    async fn list_dashboards(&self) -> DashboardResult<Vec<DashboardSummary>> {
        Ok(self.state().dashboards.iter().map(Dashboard::summary).collect())
    }

    async fn get_dashboard(&self, id: &DashboardId) -> DashboardResult<Dashboard> {
        self.state().dashboard_mut(id).map(|d| d.clone())
    }

    async fn create_dashboard(&self, new: &NewDashboard) -> DashboardResult<Dashboard> {
        let now = Utc::now();
        let dashboard = Dashboard {
            id: DashboardId::generate(),
            name: new.name.clone(),
            layout_config: new.layout.unwrap_or_default(),
            is_default: new.is_default.unwrap_or(false),
            widgets: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let mut state = self.state();
        if dashboard.is_default {
            state.clear_default_except(&dashboard.id);
        }
        state.dashboards.push(dashboard.clone());
        Ok(dashboard)
    }

    async fn update_dashboard(&self, id: &DashboardId, patch: &DashboardPatch) -> DashboardResult<Dashboard> {
        let mut state = self.state();
        let dashboard = state.dashboard_mut(id)?;
        patch.apply_to(dashboard);
        dashboard.updated_at = Utc::now();
        let updated = dashboard.clone();
        if updated.is_default {
            state.clear_default_except(id);
        }
        Ok(updated)
    }

    async fn delete_dashboard(&self, id: &DashboardId) -> DashboardResult<()> {
        let mut state = self.state();
        let before = state.dashboards.len();
        state.dashboards.retain(|d| &d.id != id);
        if state.dashboards.len() == before {
            return Err(DashboardError::dashboard_not_found(id));
        }
        Ok(())
    }

    async fn create_widget(&self, dashboard_id: &DashboardId, new: &NewWidget) -> DashboardResult<Widget> {
        let mut state = self.state();
        let dashboard = state.dashboard_mut(dashboard_id)?;
        let widget = Widget::from_new(WidgetId::generate(), new.clone());
        dashboard.widgets.push(widget.clone());
        dashboard.updated_at = Utc::now();
        state.widget_writes += 1;
        Ok(widget)
    }

    async fn update_widget(
        &self,
        dashboard_id: &DashboardId,
        widget_id: &WidgetId,
        patch: &WidgetPatch,
    ) -> DashboardResult<Widget> {
        let mut state = self.state();
        let dashboard = state.dashboard_mut(dashboard_id)?;
        let widget = dashboard
            .widgets
            .iter_mut()
            .find(|w| &w.id == widget_id)
            .ok_or_else(|| DashboardError::widget_not_found(widget_id))?;
        patch.apply_content(widget);
        widget.set_rect(patch.target_rect(widget.rect()));
        let updated = widget.clone();
        dashboard.updated_at = Utc::now();
        state.widget_writes += 1;
        Ok(updated)
    }

    async fn delete_widget(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> DashboardResult<()> {
        let mut state = self.state();
        let dashboard = state.dashboard_mut(dashboard_id)?;
        let before = dashboard.widgets.len();
        dashboard.widgets.retain(|w| &w.id != widget_id);
        if dashboard.widgets.len() == before {
            return Err(DashboardError::widget_not_found(widget_id));
        }
        dashboard.updated_at = Utc::now();
        state.widget_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl WidgetDataSource for MemoryDashboardStore {
    async fn fetch_widget_data(&self, dashboard_id: &DashboardId, widget: &Widget) -> DashboardResult<Value> {
        let widget_type = widget_registry::lookup(&widget.kind)?;
        let mut state = self.state();
        let dashboard = state.dashboard_mut(dashboard_id)?;
        if !dashboard.widgets.iter().any(|w| w.id == widget.id) {
            return Err(DashboardError::widget_not_found(&widget.id));
        }
        if let Some(payload) = state.source_data.get(&widget.data_source) {
            return Ok(payload.clone());
        }
        drop(state);
        Ok(self.synthesize(widget_type, widget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::widget::Rect;

    async fn seeded() -> (MemoryDashboardStore, DashboardId) {
        let store = MemoryDashboardStore::new();
        let dashboard = store.create_dashboard(&NewDashboard::named("Cash flow")).await.unwrap();
        (store, dashboard.id)
    }

    #[tokio::test]
    async fn test_widget_crud_and_write_count() {
        let (store, id) = seeded().await;
        let widget = store
            .create_widget(&id, &NewWidget::new(WidgetType::Gauge, "Budget used", "budget", Rect::new(0, 0, 3, 2)))
            .await
            .unwrap();

        let moved = store
            .update_widget(&id, &widget.id, &WidgetPatch::layout(Rect::new(3, 1, 3, 2)))
            .await
            .unwrap();
        assert_eq!(moved.rect(), Rect::new(3, 1, 3, 2));
        assert_eq!(moved.title, "Budget used");

        store.delete_widget(&id, &widget.id).await.unwrap();
        assert!(store.get_dashboard(&id).await.unwrap().widgets.is_empty());
        assert_eq!(store.write_count(), 3);

        let err = store.delete_widget(&id, &widget.id).await.unwrap_err();
        assert!(matches!(err, DashboardError::NotFound { kind: "widget", .. }));
    }

    #[tokio::test]
    async fn test_only_one_default_dashboard() {
        let (store, first) = seeded().await;
        store
            .update_dashboard(&first, &DashboardPatch { is_default: Some(true), ..DashboardPatch::default() })
            .await
            .unwrap();

        let mut new = NewDashboard::named("Budget");
        new.is_default = Some(true);
        store.create_dashboard(&new).await.unwrap();

        let defaults = store
            .list_dashboards()
            .await
            .unwrap()
            .into_iter()
            .filter(|d| d.is_default)
            .count();
        assert_eq!(defaults, 1);
    }

    #[tokio::test]
    async fn test_synthesized_payloads_satisfy_every_contract() {
        let (store, id) = seeded().await;
        for (i, widget_type) in WidgetType::ALL.iter().enumerate() {
            let widget = store
                .create_widget(
                    &id,
                    &NewWidget::new(*widget_type, "w", "ledger", Rect::new(0, (i * 2) as u32, 4, 2)),
                )
                .await
                .unwrap();
            let payload = store.fetch_widget_data(&id, &widget).await.unwrap();
            widget_registry::render(&widget, &payload).unwrap();
        }
    }

    #[tokio::test]
    async fn test_data_for_removed_widget_is_not_found() {
        let (store, id) = seeded().await;
        let widget = store
            .create_widget(&id, &NewWidget::new(WidgetType::Text, "Notes", "notes", Rect::new(0, 0, 4, 2)))
            .await
            .unwrap();
        store.delete_widget(&id, &widget.id).await.unwrap();

        let err = store.fetch_widget_data(&id, &widget).await.unwrap_err();
        assert!(matches!(err, DashboardError::NotFound { .. }));
    }
}
