// Widget domain model
use super::ids::WidgetId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type WidgetConfig = Map<String, Value>;

/// Smallest width and height a widget may occupy, in grid cells.
pub const MIN_CELL_SIZE: u32 = 2;

/// Tallest a single widget may be, in rows.
pub const MAX_ROW_SPAN: u32 = 1_000;

/// Deepest row a widget may be dragged to before compaction.
pub const MAX_ROW: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WidgetType {
    Kpi,
    Chart,
    Table,
    Text,
    Gauge,
    Heatmap,
    TimeSeries,
}

impl WidgetType {
    pub const ALL: [WidgetType; 7] = [
        WidgetType::Kpi,
        WidgetType::Chart,
        WidgetType::Table,
        WidgetType::Text,
        WidgetType::Gauge,
        WidgetType::Heatmap,
        WidgetType::TimeSeries,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            WidgetType::Kpi => "KPI",
            WidgetType::Chart => "CHART",
            WidgetType::Table => "TABLE",
            WidgetType::Text => "TEXT",
            WidgetType::Gauge => "GAUGE",
            WidgetType::Heatmap => "HEATMAP",
            WidgetType::TimeSeries => "TIME_SERIES",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }
}

/// The type tag as persisted. Unknown tags survive deserialization so that a
/// single bad widget cannot fail a whole dashboard load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WidgetKind {
    Known(WidgetType),
    Unsupported(String),
}

impl From<String> for WidgetKind {
    fn from(tag: String) -> Self {
        match WidgetType::from_tag(&tag) {
            Some(widget_type) => WidgetKind::Known(widget_type),
            None => WidgetKind::Unsupported(tag),
        }
    }
}

impl From<WidgetKind> for String {
    fn from(kind: WidgetKind) -> Self {
        match kind {
            WidgetKind::Known(widget_type) => widget_type.tag().to_string(),
            WidgetKind::Unsupported(tag) => tag,
        }
    }
}

impl From<WidgetType> for WidgetKind {
    fn from(widget_type: WidgetType) -> Self {
        WidgetKind::Known(widget_type)
    }
}

/// A rectangle on the grid, in cells. Covers `[x, x+w) × [y, y+h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Saturates instead of wrapping; see `fits_within` for bounds checks.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    /// True when `[x, x+w)` lies inside a grid of `columns` columns.
    pub fn fits_within(&self, columns: u32) -> bool {
        self.x.checked_add(self.w).is_some_and(|right| right <= columns)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub id: WidgetId,
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    pub title: String,
    #[serde(default)]
    pub config: WidgetConfig,
    pub position_x: u32,
    pub position_y: u32,
    pub size_w: u32,
    pub size_h: u32,
    pub data_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_seconds: Option<u32>,
}

impl Widget {
    pub fn from_new(id: WidgetId, new: NewWidget) -> Self {
        Self {
            id,
            kind: new.kind,
            title: new.title,
            config: new.config,
            position_x: new.position_x,
            position_y: new.position_y,
            size_w: new.size_w,
            size_h: new.size_h,
            data_source: new.data_source,
            refresh_interval_seconds: new.refresh_interval_seconds,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.position_x, self.position_y, self.size_w, self.size_h)
    }

    /// Layout mutations only ever go through here.
    pub fn set_rect(&mut self, rect: Rect) {
        self.position_x = rect.x;
        self.position_y = rect.y;
        self.size_w = rect.w;
        self.size_h = rect.h;
    }

    /// A refresh interval of zero means "no periodic refresh".
    pub fn refresh_interval(&self) -> Option<std::time::Duration> {
        self.refresh_interval_seconds
            .filter(|secs| *secs > 0)
            .map(|secs| std::time::Duration::from_secs(u64::from(secs)))
    }

    /// Fields that decide what the data fetcher asks for.
    pub fn same_data_binding(&self, other: &Widget) -> bool {
        self.kind == other.kind
            && self.data_source == other.data_source
            && self.config == other.config
            && self.refresh_interval_seconds == other.refresh_interval_seconds
    }
}

/// Widget configuration as sent when adding a widget; the server assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWidget {
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    pub title: String,
    #[serde(default)]
    pub config: WidgetConfig,
    pub position_x: u32,
    pub position_y: u32,
    pub size_w: u32,
    pub size_h: u32,
    pub data_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_seconds: Option<u32>,
}

impl NewWidget {
    pub fn new(widget_type: WidgetType, title: impl Into<String>, data_source: impl Into<String>, rect: Rect) -> Self {
        Self {
            kind: widget_type.into(),
            title: title.into(),
            config: WidgetConfig::new(),
            position_x: rect.x,
            position_y: rect.y,
            size_w: rect.w,
            size_h: rect.h,
            data_source: data_source.into(),
            refresh_interval_seconds: None,
        }
    }

    pub fn with_config(mut self, config: WidgetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_refresh_interval(mut self, seconds: u32) -> Self {
        self.refresh_interval_seconds = Some(seconds);
        self
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.position_x, self.position_y, self.size_w, self.size_h)
    }
}

impl From<&Widget> for NewWidget {
    fn from(widget: &Widget) -> Self {
        Self {
            kind: widget.kind.clone(),
            title: widget.title.clone(),
            config: widget.config.clone(),
            position_x: widget.position_x,
            position_y: widget.position_y,
            size_w: widget.size_w,
            size_h: widget.size_h,
            data_source: widget.data_source.clone(),
            refresh_interval_seconds: widget.refresh_interval_seconds,
        }
    }
}

/// Partial widget update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<WidgetConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_x: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_y: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_seconds: Option<u32>,
}

impl WidgetPatch {
    /// A patch carrying only position and size, as sent after a layout commit.
    pub fn layout(rect: Rect) -> Self {
        Self {
            position_x: Some(rect.x),
            position_y: Some(rect.y),
            size_w: Some(rect.w),
            size_h: Some(rect.h),
            ..Self::default()
        }
    }

    pub fn touches_layout(&self) -> bool {
        self.position_x.is_some()
            || self.position_y.is_some()
            || self.size_w.is_some()
            || self.size_h.is_some()
    }

    /// The rectangle the widget would occupy once this patch is applied.
    pub fn target_rect(&self, current: Rect) -> Rect {
        Rect::new(
            self.position_x.unwrap_or(current.x),
            self.position_y.unwrap_or(current.y),
            self.size_w.unwrap_or(current.w),
            self.size_h.unwrap_or(current.h),
        )
    }

    /// Applies the non-layout fields; layout goes through the layout engine.
    pub fn apply_content(&self, widget: &mut Widget) {
        if let Some(title) = &self.title {
            widget.title = title.clone();
        }
        if let Some(config) = &self.config {
            widget.config = config.clone();
        }
        if let Some(data_source) = &self.data_source {
            widget.data_source = data_source.clone();
        }
        if let Some(seconds) = self.refresh_interval_seconds {
            widget.refresh_interval_seconds = Some(seconds);
        }
    }
}
