// Preset loader - built-in widget templates for seeding and extending dashboards
use crate::application::dashboard_controller::DashboardController;
use crate::application::widget_registry;
use crate::domain::dashboard::{Dashboard, LayoutConfig, NewDashboard};
use crate::domain::error::{DashboardError, DashboardResult};
use crate::domain::ids::DashboardId;
use crate::domain::layout::LayoutEngine;
use crate::domain::widget::{NewWidget, Rect, Widget, WidgetConfig, WidgetKind};
use serde::{Deserialize, Serialize};

const BUILTIN: &[(&str, &str)] = &[
    ("finance_overview.toml", include_str!("../../presets/finance_overview.toml")),
    ("budget_tracker.toml", include_str!("../../presets/budget_tracker.toml")),
    ("cash_flow.toml", include_str!("../../presets/cash_flow.toml")),
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetTemplate {
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    pub title: String,
    pub data_source: String,
    #[serde(default)]
    pub config: WidgetConfig,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(default)]
    pub refresh_interval_seconds: Option<u32>,
}

impl WidgetTemplate {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.w, self.h)
    }

    fn instantiate(&self, row_offset: u32) -> NewWidget {
        let rect = Rect::new(self.x, self.y.saturating_add(row_offset), self.w, self.h);
        NewWidget {
            kind: self.kind.clone(),
            title: self.title.clone(),
            config: self.config.clone(),
            position_x: rect.x,
            position_y: rect.y,
            size_w: rect.w,
            size_h: rect.h,
            data_source: self.data_source.clone(),
            refresh_interval_seconds: self.refresh_interval_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub layout: LayoutConfig,
    pub widgets: Vec<WidgetTemplate>,
}

impl Preset {
    /// Rejects templates the controller would refuse anyway, so a broken
    /// preset fails at load rather than half-way through an apply.
    fn check(&self) -> DashboardResult<()> {
        let engine = LayoutEngine::new(self.layout.columns)?;
        for template in &self.widgets {
            let widget_type = widget_registry::lookup(&template.kind)?;
            widget_registry::validate_config(widget_type, &template.config)?;
            engine.validate(&template.rect())?;
        }
        Ok(())
    }

    fn widest(&self) -> u32 {
        self.widgets.iter().map(|t| t.rect().right()).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub widget_count: usize,
}

/// Templates carry coordinates relative to the preset's own grid and no
/// ids. Ids come from the controller and then the server.
#[derive(Debug, Clone)]
pub struct PresetLoader {
    presets: Vec<Preset>,
}

impl PresetLoader {
    pub fn builtin() -> DashboardResult<Self> {
        Self::from_sources(BUILTIN)
    }

    /// Parses `(file name, toml)` pairs.
    pub fn from_sources(sources: &[(&str, &str)]) -> DashboardResult<Self> {
        let mut presets: Vec<Preset> = Vec::with_capacity(sources.len());
        for (file, source) in sources {
            let preset: Preset = toml::from_str(source)
                .map_err(|e| DashboardError::validation(format!("preset {}: {}", file, e)))?;
            preset
                .check()
                .map_err(|e| DashboardError::validation(format!("preset {}: {}", file, e)))?;
            if presets.iter().any(|p| p.id == preset.id) {
                return Err(DashboardError::validation(format!(
                    "preset {}: duplicate id `{}`",
                    file, preset.id
                )));
            }
            presets.push(preset);
        }
        tracing::debug!(count = presets.len(), "presets loaded");
        Ok(Self { presets })
    }

    pub fn list(&self) -> Vec<PresetSummary> {
        self.presets
            .iter()
            .map(|p| PresetSummary {
                id: p.id.clone(),
                name: p.name.clone(),
                description: p.description.clone(),
                widget_count: p.widgets.len(),
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> DashboardResult<&Preset> {
        self.presets
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| DashboardError::NotFound {
                kind: "preset",
                id: id.to_string(),
            })
    }

    /// Creates a dashboard with the preset's grid and widgets. If the widgets
    /// cannot be added the new dashboard is deleted again.
    pub async fn seed_new_dashboard(
        &self,
        controller: &DashboardController,
        preset_id: &str,
        name: Option<String>,
    ) -> DashboardResult<Dashboard> {
        let preset = self.get(preset_id)?;
        let dashboard = controller
            .create_dashboard(NewDashboard {
                name: name.unwrap_or_else(|| preset.name.clone()),
                layout: Some(preset.layout),
                is_default: None,
            })
            .await?;

        let widgets = preset.widgets.iter().map(|t| t.instantiate(0)).collect();
        if let Err(e) = controller.add_widgets(&dashboard.id, widgets).await {
            if let Err(cleanup) = controller.delete_dashboard(&dashboard.id).await {
                tracing::warn!(dashboard_id = %dashboard.id, error = %cleanup, "could not remove partially seeded dashboard");
            }
            return Err(e);
        }
        tracing::info!(dashboard_id = %dashboard.id, preset = preset_id, "dashboard seeded from preset");

        match controller.snapshot(&dashboard.id).await {
            Some(seeded) => Ok(seeded),
            None => controller.get_dashboard(&dashboard.id).await,
        }
    }

    /// Appends the preset's widgets below the dashboard's current content.
    pub async fn apply_to_dashboard(
        &self,
        controller: &DashboardController,
        dashboard_id: &DashboardId,
        preset_id: &str,
    ) -> DashboardResult<Vec<Widget>> {
        let preset = self.get(preset_id)?;
        let dashboard = match controller.snapshot(dashboard_id).await {
            Some(dashboard) => dashboard,
            None => controller.get_dashboard(dashboard_id).await?,
        };

        if preset.widest() > dashboard.layout_config.columns {
            return Err(DashboardError::validation(format!(
                "preset `{}` needs {} columns, dashboard has {}",
                preset.id,
                preset.widest(),
                dashboard.layout_config.columns
            )));
        }

        let offset = dashboard
            .widgets
            .iter()
            .map(|w| w.rect().bottom())
            .max()
            .unwrap_or(0);
        let widgets = preset.widgets.iter().map(|t| t.instantiate(offset)).collect();
        let added = controller.add_widgets(dashboard_id, widgets).await?;
        tracing::info!(dashboard_id = %dashboard_id, preset = preset_id, added = added.len(), "preset applied");
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dashboard_repository::DashboardRepository;
    use crate::application::data_fetcher::WidgetDataFetcher;
    use crate::application::notifier::Notifier;
    use crate::domain::layout::Placement;
    use crate::domain::dashboard::{DashboardPatch, DashboardSummary};
    use crate::domain::ids::WidgetId;
    use crate::domain::widget::{WidgetPatch, WidgetType};
    use crate::infrastructure::memory_store::MemoryDashboardStore;
    use crate::infrastructure::tracing_notifier::TracingNotifier;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Arc;

    /// Memory store whose widget creates always fail.
    struct NoWidgetWrites(Arc<MemoryDashboardStore>);

    #[async_trait]
    impl DashboardRepository for NoWidgetWrites {
        async fn list_dashboards(&self) -> DashboardResult<Vec<DashboardSummary>> {
            self.0.list_dashboards().await
        }

        async fn get_dashboard(&self, id: &DashboardId) -> DashboardResult<Dashboard> {
            self.0.get_dashboard(id).await
        }

        async fn create_dashboard(&self, new: &NewDashboard) -> DashboardResult<Dashboard> {
            self.0.create_dashboard(new).await
        }

        async fn update_dashboard(&self, id: &DashboardId, patch: &DashboardPatch) -> DashboardResult<Dashboard> {
            self.0.update_dashboard(id, patch).await
        }

        async fn delete_dashboard(&self, id: &DashboardId) -> DashboardResult<()> {
            self.0.delete_dashboard(id).await
        }

        async fn create_widget(&self, _: &DashboardId, _: &NewWidget) -> DashboardResult<Widget> {
            Err(DashboardError::Network("connection reset".to_string()))
        }

        async fn update_widget(&self, dashboard_id: &DashboardId, widget_id: &WidgetId, patch: &WidgetPatch) -> DashboardResult<Widget> {
            self.0.update_widget(dashboard_id, widget_id, patch).await
        }

        async fn delete_widget(&self, dashboard_id: &DashboardId, widget_id: &WidgetId) -> DashboardResult<()> {
            self.0.delete_widget(dashboard_id, widget_id).await
        }
    }

    fn controller() -> DashboardController {
        let store = Arc::new(MemoryDashboardStore::new());
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
        DashboardController::new(store.clone(), WidgetDataFetcher::new(store), notifier)
    }

    fn assert_valid_layout(dashboard: &Dashboard) {
        let engine = LayoutEngine::new(dashboard.layout_config.columns).unwrap();
        let placements: Vec<Placement> = dashboard
            .widgets
            .iter()
            .map(|w| Placement::new(w.id.clone(), w.rect()))
            .collect();
        engine.check(&placements).unwrap();
        let ids: HashSet<_> = dashboard.widgets.iter().map(|w| w.id.clone()).collect();
        assert_eq!(ids.len(), dashboard.widgets.len());
    }

    #[test]
    fn test_builtin_presets_parse_and_validate() {
        let loader = PresetLoader::builtin().unwrap();
        let summaries = loader.list();

        assert_eq!(summaries.len(), 3);
        let overview = loader.get("finance-overview").unwrap();
        assert_eq!(overview.widgets.len(), 6);
        assert_eq!(overview.widgets[0].kind, WidgetKind::Known(WidgetType::Kpi));
        assert_eq!(overview.widgets[0].config["metric"], "total");
    }

    #[test]
    fn test_out_of_bounds_template_is_rejected() {
        let source = r#"
            id = "wide"
            name = "Too wide"
            [layout]
            columns = 6
            rowHeightPx = 80
            [[widgets]]
            type = "TEXT"
            title = "Notes"
            dataSource = "notes"
            x = 4
            y = 0
            w = 4
            h = 2
        "#;

        let err = PresetLoader::from_sources(&[("wide.toml", source)]).unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));
    }

    #[test]
    fn test_unknown_preset_is_not_found() {
        let loader = PresetLoader::builtin().unwrap();
        let err = loader.get("missing").unwrap_err();
        assert!(matches!(err, DashboardError::NotFound { kind: "preset", .. }));
    }

    #[tokio::test]
    async fn test_apply_six_widget_preset_to_empty_dashboard() {
        let loader = PresetLoader::builtin().unwrap();
        let controller = controller();
        let dashboard = controller
            .create_dashboard(NewDashboard::named("Empty"))
            .await
            .unwrap();

        let added = loader
            .apply_to_dashboard(&controller, &dashboard.id, "finance-overview")
            .await
            .unwrap();

        assert_eq!(added.len(), 6);
        let after = controller.snapshot(&dashboard.id).await.unwrap();
        assert_eq!(after.widgets.len(), 6);
        assert_valid_layout(&after);
    }

    #[tokio::test]
    async fn test_apply_merges_below_existing_widgets_with_fresh_ids() {
        let loader = PresetLoader::builtin().unwrap();
        let controller = controller();
        let dashboard = loader
            .seed_new_dashboard(&controller, "budget-tracker", None)
            .await
            .unwrap();
        assert_eq!(dashboard.name, "Budget tracker");
        let bottom = dashboard.widgets.iter().map(|w| w.rect().bottom()).max().unwrap();

        let added = loader
            .apply_to_dashboard(&controller, &dashboard.id, "budget-tracker")
            .await
            .unwrap();

        let after = controller.snapshot(&dashboard.id).await.unwrap();
        assert_eq!(after.widgets.len(), 8);
        assert_valid_layout(&after);
        let existing: HashSet<_> = dashboard.widgets.iter().map(|w| w.id.clone()).collect();
        assert!(added.iter().all(|w| !existing.contains(&w.id)));
        assert!(added.iter().all(|w| w.position_y >= bottom));
    }

    #[tokio::test]
    async fn test_failed_seed_leaves_no_dashboard_behind() {
        let loader = PresetLoader::builtin().unwrap();
        let store = Arc::new(MemoryDashboardStore::new());
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
        let controller = DashboardController::new(
            Arc::new(NoWidgetWrites(store.clone())),
            WidgetDataFetcher::new(store.clone()),
            notifier,
        );

        let err = loader
            .seed_new_dashboard(&controller, "cash-flow", Some("Q3".to_string()))
            .await
            .unwrap_err();

        assert!(err.is_network());
        assert!(store.list_dashboards().await.unwrap().is_empty());
        assert!(controller.list_dashboards().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preset_wider_than_dashboard_is_rejected() {
        let loader = PresetLoader::builtin().unwrap();
        let controller = controller();
        let mut narrow = NewDashboard::named("Narrow");
        narrow.layout = Some(LayoutConfig {
            columns: 6,
            row_height_px: 80,
        });
        let dashboard = controller.create_dashboard(narrow).await.unwrap();

        let err = loader
            .apply_to_dashboard(&controller, &dashboard.id, "finance-overview")
            .await
            .unwrap_err();

        assert!(matches!(err, DashboardError::Validation(_)));
        assert!(controller.snapshot(&dashboard.id).await.unwrap().widgets.is_empty());
    }
}
