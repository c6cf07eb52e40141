// Render output models - what a widget renderer hands to a drawing primitive
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesData {
    pub name: String,
    pub values: Vec<f64>,
}

impl SeriesData {
    pub fn new(name: String, values: Vec<f64>) -> Self {
        Self { name, values }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Area,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeBand {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScale {
    Linear,
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Visual {
    #[serde(rename_all = "camelCase")]
    Kpi {
        metric: String,
        value: f64,
        trend_percent: Option<f64>,
        period: String,
    },
    #[serde(rename_all = "camelCase")]
    Chart {
        chart_type: ChartKind,
        group_by: String,
        period: String,
        labels: Vec<String>,
        series: Vec<SeriesData>,
    },
    #[serde(rename_all = "camelCase")]
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
        total_rows: usize,
    },
    Text {
        body: String,
        markdown: bool,
    },
    #[serde(rename_all = "camelCase")]
    Gauge {
        value: f64,
        min: f64,
        max: f64,
        ratio: f64,
        band: GaugeBand,
        unit: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Heatmap {
        x_labels: Vec<String>,
        y_labels: Vec<String>,
        /// Row-major intensities in `[0, 1]`.
        intensities: Vec<Vec<f64>>,
        scale: ColorScale,
    },
    #[serde(rename_all = "camelCase")]
    TimeSeries {
        interval: String,
        cumulative: bool,
        points: Vec<TimeSeriesPoint>,
    },
}
