// Dashboard domain model
use super::ids::DashboardId;
use super::widget::Widget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COLUMNS: u32 = 12;
pub const DEFAULT_ROW_HEIGHT_PX: u32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutConfig {
    pub columns: u32,
    pub row_height_px: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS,
            row_height_px: DEFAULT_ROW_HEIGHT_PX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub id: DashboardId,
    pub name: String,
    #[serde(default, alias = "layout")]
    pub layout_config: LayoutConfig,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub widgets: Vec<Widget>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dashboard {
    pub fn summary(&self) -> DashboardSummary {
        DashboardSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            layout_config: self.layout_config,
            is_default: self.is_default,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// List entry returned by `GET /dashboards`; carries no widgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub id: DashboardId,
    pub name: String,
    #[serde(default, alias = "layout")]
    pub layout_config: LayoutConfig,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDashboard {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
}

impl NewDashboard {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout: None,
            is_default: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
}

impl DashboardPatch {
    pub fn apply_to(&self, dashboard: &mut Dashboard) {
        if let Some(name) = &self.name {
            dashboard.name = name.clone();
        }
        if let Some(layout) = self.layout {
            dashboard.layout_config = layout;
        }
        if let Some(is_default) = self.is_default {
            dashboard.is_default = is_default;
        }
    }
}
