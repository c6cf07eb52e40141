// Widget renderers - turn a validated payload into a view model per widget type
use crate::application::widget_registry::ResolvedConfig;
use crate::domain::error::{DashboardError, DashboardResult};
use crate::domain::visual::{ChartKind, ColorScale, GaugeBand, SeriesData, TimeSeriesPoint, Visual};
use serde_json::Value;
use std::cmp::Ordering;

pub const DEFAULT_MAX_POINTS: usize = 150;

fn malformed(message: impl Into<String>) -> DashboardError {
    DashboardError::Validation(message.into())
}

fn array<'a>(data: &'a Value, key: &str) -> DashboardResult<&'a Vec<Value>> {
    data.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(format!("`{}` must be an array", key)))
}

fn number(data: &Value, key: &str) -> DashboardResult<f64> {
    data.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed(format!("`{}` must be a number", key)))
}

fn labels(data: &Value, key: &str) -> DashboardResult<Vec<String>> {
    array(data, key)?
        .iter()
        .map(|label| match label {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(malformed(format!("`{}` entries must be strings, got {}", key, other))),
        })
        .collect()
}

fn numbers(values: &[Value], context: &str) -> DashboardResult<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| malformed(format!("{} must only contain numbers, got {}", context, v)))
        })
        .collect()
}

pub fn kpi(config: &ResolvedConfig, data: &Value) -> DashboardResult<Visual> {
    let metric = config.text("metric").unwrap_or("total").to_string();
    let value = data
        .get("metrics")
        .and_then(|m| m.get(&metric))
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed(format!("metric `{}` is not in the payload", metric)))?;

    let trend_percent = if config.flag("showTrend") {
        data.get("previous")
            .and_then(|p| p.get(&metric))
            .and_then(Value::as_f64)
            .filter(|previous| *previous != 0.0)
            .map(|previous| (value - previous) / previous.abs() * 100.0)
    } else {
        None
    };

    Ok(Visual::Kpi {
        metric,
        value,
        trend_percent,
        period: config.text("period").unwrap_or("month").to_string(),
    })
}

pub fn chart(config: &ResolvedConfig, data: &Value) -> DashboardResult<Visual> {
    let chart_type = match config.text("chartType").unwrap_or("bar") {
        "line" => ChartKind::Line,
        "pie" => ChartKind::Pie,
        "area" => ChartKind::Area,
        _ => ChartKind::Bar,
    };
    let labels = labels(data, "labels")?;

    let mut series = Vec::new();
    for entry in array(data, "series")? {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("series")
            .to_string();
        let values = numbers(array(entry, "values")?, &format!("series `{}`", name))?;
        if values.len() != labels.len() {
            return Err(malformed(format!(
                "series `{}` has {} values for {} labels",
                name,
                values.len(),
                labels.len()
            )));
        }
        series.push(SeriesData::new(name, values));
    }

    if chart_type == ChartKind::Pie {
        series.truncate(1);
    }

    Ok(Visual::Chart {
        chart_type,
        group_by: config.text("groupBy").unwrap_or("month").to_string(),
        period: config.text("period").unwrap_or("month").to_string(),
        labels,
        series,
    })
}

fn compare_cells(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        // Nulls and mixed kinds sink to the end.
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

pub fn table(config: &ResolvedConfig, data: &Value) -> DashboardResult<Visual> {
    let columns = labels(data, "columns")?;

    let mut rows = Vec::new();
    for row in array(data, "rows")? {
        let cells = match row {
            Value::Array(cells) => cells.clone(),
            Value::Object(fields) => columns
                .iter()
                .map(|c| fields.get(c).cloned().unwrap_or(Value::Null))
                .collect(),
            other => return Err(malformed(format!("table rows must be arrays or objects, got {}", other))),
        };
        if cells.len() != columns.len() {
            return Err(malformed(format!(
                "table row has {} cells for {} columns",
                cells.len(),
                columns.len()
            )));
        }
        rows.push(cells);
    }

    if let Some(sort_by) = config.text("sortBy") {
        let index = columns
            .iter()
            .position(|c| c == sort_by)
            .ok_or_else(|| malformed(format!("sortBy column `{}` is not in the table", sort_by)))?;
        rows.sort_by(|a, b| compare_cells(&a[index], &b[index]));
        if config.text("sortDirection") == Some("desc") {
            rows.reverse();
        }
    }

    let total_rows = rows.len();
    let page_size = config.number("pageSize").unwrap_or(10.0).max(1.0) as usize;
    rows.truncate(page_size);

    Ok(Visual::Table {
        columns,
        rows,
        total_rows,
    })
}

pub fn text(config: &ResolvedConfig, data: &Value) -> DashboardResult<Visual> {
    let body = data
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("`content` must be a string"))?;
    Ok(Visual::Text {
        body: body.to_string(),
        markdown: config.text("format") == Some("markdown"),
    })
}

pub fn gauge(config: &ResolvedConfig, data: &Value) -> DashboardResult<Visual> {
    let value = number(data, "value")?;
    let max = number(data, "max")?;
    let min = config.number("min").unwrap_or(0.0);
    if max <= min {
        return Err(malformed(format!("gauge max {} must exceed min {}", max, min)));
    }

    let ratio = ((value - min) / (max - min)).clamp(0.0, 1.0);
    let band = match (config.number("critAt"), config.number("warnAt")) {
        (Some(crit), _) if value >= crit => GaugeBand::Critical,
        (_, Some(warn)) if value >= warn => GaugeBand::Warning,
        _ => GaugeBand::Normal,
    };

    Ok(Visual::Gauge {
        value,
        min,
        max,
        ratio,
        band,
        unit: config.text("unit").map(str::to_string),
    })
}

pub fn heatmap(config: &ResolvedConfig, data: &Value) -> DashboardResult<Visual> {
    let x_labels = labels(data, "xLabels")?;
    let y_labels = labels(data, "yLabels")?;

    let mut grid = Vec::with_capacity(y_labels.len());
    for row in array(data, "values")? {
        let row = row
            .as_array()
            .ok_or_else(|| malformed("heatmap `values` must be an array of rows"))?;
        let row = numbers(row, "heatmap rows")?;
        if row.len() != x_labels.len() {
            return Err(malformed(format!(
                "heatmap row has {} values for {} x labels",
                row.len(),
                x_labels.len()
            )));
        }
        grid.push(row);
    }
    if grid.len() != y_labels.len() {
        return Err(malformed(format!(
            "heatmap has {} rows for {} y labels",
            grid.len(),
            y_labels.len()
        )));
    }

    let scale = match config.text("colorScale") {
        Some("log") => ColorScale::Log,
        _ => ColorScale::Linear,
    };
    let (lo, hi) = grid
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let span = hi - lo;

    let intensities = grid
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| {
                    if span <= 0.0 {
                        return 0.0;
                    }
                    match scale {
                        ColorScale::Linear => (v - lo) / span,
                        ColorScale::Log => (v - lo).ln_1p() / span.ln_1p(),
                    }
                })
                .collect()
        })
        .collect();

    Ok(Visual::Heatmap {
        x_labels,
        y_labels,
        intensities,
        scale,
    })
}

fn point_time(raw: &Value) -> DashboardResult<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| malformed(format!("timestamp {} is not an integer", n))),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|t| t.timestamp_millis())
            .map_err(|e| malformed(format!("timestamp `{}` is not RFC 3339: {}", s, e))),
        other => Err(malformed(format!("timestamp must be a string or number, got {}", other))),
    }
}

pub fn time_series(config: &ResolvedConfig, data: &Value) -> DashboardResult<Visual> {
    let mut points = array(data, "points")?
        .iter()
        .map(|p| {
            let time_ms = point_time(p.get("t").unwrap_or(&Value::Null))?;
            let value = number(p, "v")?;
            Ok(TimeSeriesPoint::new(time_ms, value))
        })
        .collect::<DashboardResult<Vec<_>>>()?;
    points.sort_by_key(|p| p.time_ms);

    let cumulative = config.flag("cumulative");
    if cumulative {
        let mut running = 0.0;
        for point in &mut points {
            running += point.value;
            point.value = running;
        }
    }

    let max_points = config
        .number("maxPoints")
        .map(|n| n.max(1.0) as usize)
        .unwrap_or(DEFAULT_MAX_POINTS);

    Ok(Visual::TimeSeries {
        interval: config.text("interval").unwrap_or("day").to_string(),
        cumulative,
        points: downsample_points(points, max_points),
    })
}

/// Downsample time series points using bucket averaging
pub fn downsample_points(points: Vec<TimeSeriesPoint>, max_points: usize) -> Vec<TimeSeriesPoint> {
    if points.is_empty() || points.len() <= max_points {
        return points;
    }

    let bucket_size = points.len().div_ceil(max_points);
    let mut downsampled = Vec::with_capacity(max_points);

    for chunk in points.chunks(bucket_size) {
        // Middle point's timestamp, average value
        let mid_idx = chunk.len() / 2;
        let avg_value = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;
        downsampled.push(TimeSeriesPoint::new(chunk[mid_idx].time_ms, avg_value));
    }

    downsampled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::widget_registry::resolve_config;
    use crate::domain::widget::WidgetType;
    use serde_json::json;

    fn resolved(widget_type: WidgetType, cfg: Value) -> ResolvedConfig {
        resolve_config(widget_type, cfg.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_kpi_selects_metric_and_computes_trend() {
        let config = resolved(WidgetType::Kpi, json!({"metric": "net"}));
        let data = json!({"metrics": {"total": 10.0, "net": 150.0}, "previous": {"net": 100.0}});

        let visual = kpi(&config, &data).unwrap();

        assert_eq!(
            visual,
            Visual::Kpi {
                metric: "net".to_string(),
                value: 150.0,
                trend_percent: Some(50.0),
                period: "month".to_string(),
            }
        );
    }

    #[test]
    fn test_kpi_trend_can_be_hidden() {
        let config = resolved(WidgetType::Kpi, json!({"showTrend": false}));
        let data = json!({"metrics": {"total": 10.0}, "previous": {"total": 5.0}});

        let Visual::Kpi { trend_percent, .. } = kpi(&config, &data).unwrap() else {
            panic!("expected a KPI visual");
        };
        assert_eq!(trend_percent, None);
    }

    #[test]
    fn test_kpi_missing_metric_fails() {
        let config = resolved(WidgetType::Kpi, json!({"metric": "margin"}));
        assert!(kpi(&config, &json!({"metrics": {"total": 1.0}})).is_err());
    }

    #[test]
    fn test_chart_checks_series_length_and_trims_pie() {
        let data = json!({
            "labels": ["Jan", "Feb"],
            "series": [{"name": "income", "values": [1, 2]}, {"name": "spend", "values": [3, 4]}]
        });

        let Visual::Chart { series, .. } = chart(&resolved(WidgetType::Chart, json!({"chartType": "pie"})), &data).unwrap()
        else {
            panic!("expected a chart visual");
        };
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].name, "income");

        let bad = json!({"labels": ["Jan"], "series": [{"name": "income", "values": [1, 2]}]});
        assert!(chart(&resolved(WidgetType::Chart, json!({})), &bad).is_err());
    }

    #[test]
    fn test_table_sorts_and_pages() {
        let config = resolved(
            WidgetType::Table,
            json!({"sortBy": "amount", "sortDirection": "desc", "pageSize": 2}),
        );
        let data = json!({
            "columns": ["customer", "amount"],
            "rows": [["acme", 10], {"customer": "globex", "amount": 30}, ["initech", 20]]
        });

        let Visual::Table { rows, total_rows, .. } = table(&config, &data).unwrap() else {
            panic!("expected a table visual");
        };
        assert_eq!(total_rows, 3);
        assert_eq!(rows, vec![vec![json!("globex"), json!(30)], vec![json!("initech"), json!(20)]]);
    }

    #[test]
    fn test_table_rejects_unknown_sort_column() {
        let config = resolved(WidgetType::Table, json!({"sortBy": "due"}));
        let data = json!({"columns": ["customer"], "rows": []});
        assert!(table(&config, &data).is_err());
    }

    #[test]
    fn test_gauge_bands() {
        let config = resolved(WidgetType::Gauge, json!({"warnAt": 70, "critAt": 90, "unit": "%"}));

        let Visual::Gauge { ratio, band, unit, .. } = gauge(&config, &json!({"value": 75, "max": 100})).unwrap() else {
            panic!("expected a gauge visual");
        };
        assert_eq!(ratio, 0.75);
        assert_eq!(band, GaugeBand::Warning);
        assert_eq!(unit.as_deref(), Some("%"));

        let Visual::Gauge { band, ratio, .. } = gauge(&config, &json!({"value": 120, "max": 100})).unwrap() else {
            panic!("expected a gauge visual");
        };
        assert_eq!(band, GaugeBand::Critical);
        assert_eq!(ratio, 1.0);

        assert!(gauge(&config, &json!({"value": 1, "max": 0})).is_err());
    }

    #[test]
    fn test_heatmap_normalises_intensity() {
        let config = resolved(WidgetType::Heatmap, json!({}));
        let data = json!({"xLabels": ["Mon", "Tue"], "yLabels": ["am"], "values": [[10, 30]]});

        let Visual::Heatmap { intensities, .. } = heatmap(&config, &data).unwrap() else {
            panic!("expected a heatmap visual");
        };
        assert_eq!(intensities, vec![vec![0.0, 1.0]]);

        let ragged = json!({"xLabels": ["Mon", "Tue"], "yLabels": ["am"], "values": [[10]]});
        assert!(heatmap(&config, &ragged).is_err());
    }

    #[test]
    fn test_time_series_sorts_accumulates_and_parses_times() {
        let config = resolved(WidgetType::TimeSeries, json!({"cumulative": true}));
        let data = json!({"points": [
            {"t": "2026-01-02T00:00:00Z", "v": 5},
            {"t": 1767225600000i64, "v": 2}
        ]});

        let Visual::TimeSeries { points, cumulative, .. } = time_series(&config, &data).unwrap() else {
            panic!("expected a time series visual");
        };
        assert!(cumulative);
        assert_eq!(points[0], TimeSeriesPoint::new(1767225600000, 2.0));
        assert_eq!(points[1].value, 7.0);
    }

    #[test]
    fn test_downsample_points() {
        let points: Vec<TimeSeriesPoint> = (0..10).map(|i| TimeSeriesPoint::new(i, i as f64)).collect();

        let result = downsample_points(points.clone(), 5);
        assert_eq!(result.len(), 5);
        assert_eq!(result[0], TimeSeriesPoint::new(1, 0.5));

        assert_eq!(downsample_points(points.clone(), 20), points);
    }
}
