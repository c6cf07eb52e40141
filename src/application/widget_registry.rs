// Widget registry - per-type config contracts and render dispatch
use crate::application::renderers;
use crate::domain::error::{DashboardError, DashboardResult};
use crate::domain::fetch_state::FetchState;
use crate::domain::ids::WidgetId;
use crate::domain::visual::Visual;
use crate::domain::widget::{Rect, Widget, WidgetConfig, WidgetKind, WidgetType};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionKind {
    Text,
    Bool,
    Number,
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Text(&'static str),
    Bool(bool),
    Number(f64),
}

impl DefaultValue {
    fn to_json(self) -> Value {
        match self {
            DefaultValue::Text(text) => Value::from(text),
            DefaultValue::Bool(flag) => Value::from(flag),
            DefaultValue::Number(n) => Value::from(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigOption {
    pub name: &'static str,
    pub kind: OptionKind,
    pub default: Option<DefaultValue>,
    /// What the option changes in the rendered widget.
    pub effect: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WidgetContract {
    pub required_data_keys: &'static [&'static str],
    pub recognized_config: &'static [ConfigOption],
}

impl WidgetContract {
    pub fn option(&self, name: &str) -> Option<&ConfigOption> {
        self.recognized_config.iter().find(|o| o.name == name)
    }
}

const PERIODS: &[&str] = &["day", "week", "month", "quarter", "year"];

static KPI: WidgetContract = WidgetContract {
    required_data_keys: &["metrics"],
    recognized_config: &[
        ConfigOption {
            name: "metric",
            kind: OptionKind::Text,
            default: Some(DefaultValue::Text("total")),
            effect: "selects the field of `metrics` shown as the headline value",
        },
        ConfigOption {
            name: "showTrend",
            kind: OptionKind::Bool,
            default: Some(DefaultValue::Bool(true)),
            effect: "shows the change against `previous` when present",
        },
        ConfigOption {
            name: "period",
            kind: OptionKind::Choice(PERIODS),
            default: Some(DefaultValue::Text("month")),
            effect: "period label the value covers",
        },
    ],
};

static CHART: WidgetContract = WidgetContract {
    required_data_keys: &["labels", "series"],
    recognized_config: &[
        ConfigOption {
            name: "chartType",
            kind: OptionKind::Choice(&["bar", "line", "pie", "area"]),
            default: Some(DefaultValue::Text("bar")),
            effect: "drawing primitive; pie keeps only the first series",
        },
        ConfigOption {
            name: "groupBy",
            kind: OptionKind::Text,
            default: Some(DefaultValue::Text("month")),
            effect: "dimension the labels are grouped by",
        },
        ConfigOption {
            name: "period",
            kind: OptionKind::Choice(PERIODS),
            default: Some(DefaultValue::Text("month")),
            effect: "period label the chart covers",
        },
    ],
};

static TABLE: WidgetContract = WidgetContract {
    required_data_keys: &["columns", "rows"],
    recognized_config: &[
        ConfigOption {
            name: "sortBy",
            kind: OptionKind::Text,
            default: None,
            effect: "column the rows are ordered by",
        },
        ConfigOption {
            name: "sortDirection",
            kind: OptionKind::Choice(&["asc", "desc"]),
            default: Some(DefaultValue::Text("asc")),
            effect: "sort order when `sortBy` is set",
        },
        ConfigOption {
            name: "pageSize",
            kind: OptionKind::Number,
            default: Some(DefaultValue::Number(10.0)),
            effect: "number of rows shown",
        },
    ],
};

static TEXT: WidgetContract = WidgetContract {
    required_data_keys: &["content"],
    recognized_config: &[ConfigOption {
        name: "format",
        kind: OptionKind::Choice(&["plain", "markdown"]),
        default: Some(DefaultValue::Text("plain")),
        effect: "whether the body is interpreted as markdown",
    }],
};

static GAUGE: WidgetContract = WidgetContract {
    required_data_keys: &["value", "max"],
    recognized_config: &[
        ConfigOption {
            name: "min",
            kind: OptionKind::Number,
            default: Some(DefaultValue::Number(0.0)),
            effect: "lower end of the dial",
        },
        ConfigOption {
            name: "warnAt",
            kind: OptionKind::Number,
            default: None,
            effect: "value from which the warning band is shown",
        },
        ConfigOption {
            name: "critAt",
            kind: OptionKind::Number,
            default: None,
            effect: "value from which the critical band is shown",
        },
        ConfigOption {
            name: "unit",
            kind: OptionKind::Text,
            default: None,
            effect: "unit suffix next to the value",
        },
    ],
};

static HEATMAP: WidgetContract = WidgetContract {
    required_data_keys: &["xLabels", "yLabels", "values"],
    recognized_config: &[ConfigOption {
        name: "colorScale",
        kind: OptionKind::Choice(&["linear", "log"]),
        default: Some(DefaultValue::Text("linear")),
        effect: "how values map to intensity",
    }],
};

static TIME_SERIES: WidgetContract = WidgetContract {
    required_data_keys: &["points"],
    recognized_config: &[
        ConfigOption {
            name: "interval",
            kind: OptionKind::Choice(&["hour", "day", "week", "month"]),
            default: Some(DefaultValue::Text("day")),
            effect: "bucket size label of the series",
        },
        ConfigOption {
            name: "cumulative",
            kind: OptionKind::Bool,
            default: Some(DefaultValue::Bool(false)),
            effect: "plots the running total instead of raw values",
        },
        ConfigOption {
            name: "maxPoints",
            kind: OptionKind::Number,
            default: Some(DefaultValue::Number(renderers::DEFAULT_MAX_POINTS as f64)),
            effect: "downsampling ceiling for the plotted series",
        },
        ConfigOption {
            name: "period",
            kind: OptionKind::Choice(PERIODS),
            default: Some(DefaultValue::Text("month")),
            effect: "period the series covers",
        },
    ],
};

/// Exhaustive over `WidgetType`, so a new type needs a contract to compile.
pub fn contract(widget_type: WidgetType) -> &'static WidgetContract {
    match widget_type {
        WidgetType::Kpi => &KPI,
        WidgetType::Chart => &CHART,
        WidgetType::Table => &TABLE,
        WidgetType::Text => &TEXT,
        WidgetType::Gauge => &GAUGE,
        WidgetType::Heatmap => &HEATMAP,
        WidgetType::TimeSeries => &TIME_SERIES,
    }
}

pub fn lookup(kind: &WidgetKind) -> DashboardResult<WidgetType> {
    match kind {
        WidgetKind::Known(widget_type) => Ok(*widget_type),
        WidgetKind::Unsupported(tag) => Err(DashboardError::UnsupportedWidgetType(tag.clone())),
    }
}

/// Config after validation, with defaults filled in for absent options.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig(WidgetConfig);

impl ResolvedConfig {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.0.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    pub fn into_inner(self) -> WidgetConfig {
        self.0
    }
}

/// Rejects unrecognized options, wrongly typed values and values outside a
/// choice set.
pub fn validate_config(widget_type: WidgetType, config: &WidgetConfig) -> DashboardResult<()> {
    let contract = contract(widget_type);
    for (name, value) in config {
        let option = contract.option(name).ok_or_else(|| {
            DashboardError::validation(format!(
                "{} widgets do not recognize config option `{}`",
                widget_type.tag(),
                name
            ))
        })?;
        check_option_value(widget_type, option, value)?;
    }
    Ok(())
}

pub fn resolve_config(widget_type: WidgetType, config: &WidgetConfig) -> DashboardResult<ResolvedConfig> {
    validate_config(widget_type, config)?;
    let mut resolved = config.clone();
    for option in contract(widget_type).recognized_config {
        if let Some(default) = option.default {
            resolved
                .entry(option.name.to_string())
                .or_insert_with(|| default.to_json());
        }
    }
    Ok(ResolvedConfig(resolved))
}

fn check_option_value(widget_type: WidgetType, option: &ConfigOption, value: &Value) -> DashboardResult<()> {
    let ok = match option.kind {
        OptionKind::Text => value.is_string(),
        OptionKind::Bool => value.is_boolean(),
        OptionKind::Number => value.is_number(),
        OptionKind::Choice(choices) => value.as_str().is_some_and(|v| choices.contains(&v)),
    };
    if ok {
        return Ok(());
    }
    let expected = match option.kind {
        OptionKind::Text => "a string".to_string(),
        OptionKind::Bool => "a boolean".to_string(),
        OptionKind::Number => "a number".to_string(),
        OptionKind::Choice(choices) => format!("one of {}", choices.join(", ")),
    };
    Err(DashboardError::validation(format!(
        "{} option `{}` must be {}, got {}",
        widget_type.tag(),
        option.name,
        expected,
        value
    )))
}

/// Checks the payload is an object carrying every required key.
pub fn check_data_shape(widget_type: WidgetType, data: &Value) -> DashboardResult<()> {
    let object = data.as_object().ok_or_else(|| {
        DashboardError::validation(format!("{} payload must be a JSON object", widget_type.tag()))
    })?;
    let missing: Vec<&str> = contract(widget_type)
        .required_data_keys
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DashboardError::validation(format!(
            "{} payload is missing {}",
            widget_type.tag(),
            missing.join(", ")
        )))
    }
}

pub fn render(widget: &Widget, data: &Value) -> DashboardResult<Visual> {
    let widget_type = lookup(&widget.kind)?;
    let config = resolve_config(widget_type, &widget.config)?;
    check_data_shape(widget_type, data)?;
    match widget_type {
        WidgetType::Kpi => renderers::kpi(&config, data),
        WidgetType::Chart => renderers::chart(&config, data),
        WidgetType::Table => renderers::table(&config, data),
        WidgetType::Text => renderers::text(&config, data),
        WidgetType::Gauge => renderers::gauge(&config, data),
        WidgetType::Heatmap => renderers::heatmap(&config, data),
        WidgetType::TimeSeries => renderers::time_series(&config, data),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Cell {
    Loading,
    Ready {
        visual: Visual,
    },
    Failed {
        message: String,
        retryable: bool,
    },
    /// Placeholder drawn where an unknown widget type would have gone.
    #[serde(rename_all = "camelCase")]
    Unsupported {
        type_tag: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedCell {
    pub widget_id: WidgetId,
    pub title: String,
    pub rect: Rect,
    pub cell: Cell,
}

/// Unknown types, fetch errors and malformed payloads all end up as a
/// `Cell` for this one widget; nothing escapes to the rest of the view.
pub fn render_cell(widget: &Widget, state: Option<&FetchState>) -> Cell {
    if let WidgetKind::Unsupported(tag) = &widget.kind {
        return Cell::Unsupported {
            type_tag: tag.clone(),
        };
    }
    match state {
        None | Some(FetchState::Loading) => Cell::Loading,
        Some(FetchState::Error { reason, retryable }) => Cell::Failed {
            message: reason.clone(),
            retryable: *retryable,
        },
        Some(FetchState::Success { data }) => match render(widget, data) {
            Ok(visual) => Cell::Ready { visual },
            Err(e) => {
                tracing::warn!(widget_id = %widget.id, error = %e, "widget payload could not be rendered");
                Cell::Failed {
                    message: e.to_string(),
                    retryable: true,
                }
            }
        },
    }
}

/// One cell per widget, in the order given.
pub fn render_dashboard<'a>(
    widgets: impl IntoIterator<Item = &'a Widget>,
    states: &HashMap<WidgetId, FetchState>,
) -> Vec<RenderedCell> {
    widgets
        .into_iter()
        .map(|widget| RenderedCell {
            widget_id: widget.id.clone(),
            title: widget.title.clone(),
            rect: widget.rect(),
            cell: render_cell(widget, states.get(&widget.id)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::widget::NewWidget;
    use serde_json::json;

    fn config(value: Value) -> WidgetConfig {
        value.as_object().cloned().unwrap()
    }

    fn widget(kind: WidgetKind, cfg: Value) -> Widget {
        let mut new = NewWidget::new(WidgetType::Kpi, "Widget", "earnings", Rect::new(0, 0, 2, 2));
        new.kind = kind;
        new.config = config(cfg);
        Widget::from_new(WidgetId::from("w1"), new)
    }

    #[test]
    fn test_every_type_has_required_keys() {
        for widget_type in WidgetType::ALL {
            assert!(!contract(widget_type).required_data_keys.is_empty(), "{:?}", widget_type);
        }
    }

    #[test]
    fn test_unknown_option_is_a_validation_error() {
        let err = validate_config(WidgetType::Kpi, &config(json!({"colour": "red"}))).unwrap_err();
        assert!(matches!(err, DashboardError::Validation(msg) if msg.contains("colour")));
    }

    #[test]
    fn test_choice_options_reject_values_outside_the_set() {
        let err = validate_config(WidgetType::Chart, &config(json!({"chartType": "radar"}))).unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));

        assert!(validate_config(WidgetType::Chart, &config(json!({"chartType": "area"}))).is_ok());
    }

    #[test]
    fn test_wrongly_typed_option_is_rejected() {
        let err = validate_config(WidgetType::Kpi, &config(json!({"showTrend": "yes"}))).unwrap_err();
        assert!(matches!(err, DashboardError::Validation(_)));
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let resolved = resolve_config(WidgetType::Kpi, &config(json!({"metric": "net"}))).unwrap();
        assert_eq!(resolved.text("metric"), Some("net"));
        assert!(resolved.flag("showTrend"));
        assert_eq!(resolved.text("period"), Some("month"));
    }

    #[test]
    fn test_missing_required_keys_are_listed() {
        let err = check_data_shape(WidgetType::Heatmap, &json!({"values": []})).unwrap_err();
        assert_eq!(
            err,
            DashboardError::Validation("HEATMAP payload is missing xLabels, yLabels".to_string())
        );
    }

    #[test]
    fn test_lookup_fails_for_unregistered_type() {
        let err = lookup(&WidgetKind::Unsupported("SANKEY".to_string())).unwrap_err();
        assert_eq!(err, DashboardError::UnsupportedWidgetType("SANKEY".to_string()));
    }

    #[test]
    fn test_failures_are_contained_to_their_cell() {
        let good = widget(WidgetType::Kpi.into(), json!({}));
        let mut bad_shape = widget(WidgetType::Kpi.into(), json!({}));
        bad_shape.id = WidgetId::from("w2");
        let mut unknown = widget(WidgetKind::Unsupported("SANKEY".to_string()), json!({}));
        unknown.id = WidgetId::from("w3");

        let mut states = HashMap::new();
        states.insert(
            good.id.clone(),
            FetchState::Success {
                data: json!({"metrics": {"total": 1200.0}}),
            },
        );
        states.insert(
            bad_shape.id.clone(),
            FetchState::Success {
                data: json!({"rows": []}),
            },
        );
        states.insert(unknown.id.clone(), FetchState::Loading);

        let cells = render_dashboard([&good, &bad_shape, &unknown], &states);

        assert_eq!(cells.len(), 3);
        assert!(matches!(cells[0].cell, Cell::Ready { .. }));
        assert!(matches!(cells[1].cell, Cell::Failed { retryable: true, .. }));
        assert_eq!(
            cells[2].cell,
            Cell::Unsupported {
                type_tag: "SANKEY".to_string()
            }
        );
    }

    #[test]
    fn test_fetch_error_renders_inline_with_retry() {
        let w = widget(WidgetType::Text.into(), json!({}));
        let cell = render_cell(
            &w,
            Some(&FetchState::Error {
                reason: "network error: timeout".to_string(),
                retryable: true,
            }),
        );
        assert_eq!(
            cell,
            Cell::Failed {
                message: "network error: timeout".to_string(),
                retryable: true
            }
        );
        assert_eq!(render_cell(&w, None), Cell::Loading);
    }
}
