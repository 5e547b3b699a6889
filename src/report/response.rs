//! Presentation-facing structures
//!
//! Everything here is plain serde data handed to views, chart renderers or
//! the CLI.

use crate::report::row::ReportRow;
use serde::{Deserialize, Serialize};

/// Default chart engine when the configuration names none
pub const DEFAULT_CHARTS_ENGINE: &str = "highcharts";

/// Column summary for table headers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnData {
    pub name: String,
    /// Field name before time-series or cross-tab suffixes
    pub computation_field: String,
    pub verbose_name: String,
    pub visible: bool,
    #[serde(rename = "type")]
    pub column_type: String,
    pub is_summable: bool,
}

/// Expanded column names used by chart renderers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub time_series_pattern: Option<String>,
    pub time_series_column_names: Vec<String>,
    pub time_series_column_verbose_names: Vec<String>,
    /// Cross-tab dimension path, empty when there is none
    pub crosstab_field: String,
    pub crosstab_column_names: Vec<String>,
    pub crosstab_column_verbose_names: Vec<String>,
}

/// Settings of one chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSettings {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub chart_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub engine_name: Option<String>,
    /// Columns plotted as values
    #[serde(default)]
    pub data_source: Vec<String>,
    /// Columns used as labels
    #[serde(default)]
    pub title_source: Vec<String>,
    #[serde(default)]
    pub plot_total: bool,
}

impl ChartSettings {
    pub fn new(chart_type: impl Into<String>) -> Self {
        Self {
            chart_type: chart_type.into(),
            ..Default::default()
        }
    }

    pub fn data_source(mut self, columns: &[&str]) -> Self {
        self.data_source = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn title_source(mut self, columns: &[&str]) -> Self {
        self.title_source = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Fill in chart ids (`{type}-{i}`), titles and engine names
pub fn get_chart_settings(settings: Vec<ChartSettings>, default_title: &str, engine: &str) -> Vec<ChartSettings> {
    settings
        .into_iter()
        .enumerate()
        .map(|(i, mut chart)| {
            if chart.id.is_none() {
                chart.id = Some(format!("{}-{}", chart.chart_type, i));
            }
            if chart.title.as_deref().map_or(true, str::is_empty) {
                chart.title = Some(default_title.to_string());
            }
            if chart.engine_name.is_none() {
                chart.engine_name = Some(engine.to_string());
            }
            chart
        })
        .collect()
}

/// Complete report payload
#[derive(Debug, Clone, Serialize)]
pub struct ReportResponse {
    pub report_slug: String,
    pub data: Vec<ReportRow>,
    pub columns: Vec<ColumnData>,
    pub metadata: ReportMetadata,
    pub chart_settings: Vec<ChartSettings>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_defaults() {
        let mut titled = ChartSettings::new("pie");
        titled.title = Some("Share".to_string());
        titled.engine_name = Some("chartsjs".to_string());

        let charts = get_chart_settings(
            vec![ChartSettings::new("bar").data_source(&["__total__"]), titled],
            "Client totals",
            DEFAULT_CHARTS_ENGINE,
        );
        assert_eq!(charts[0].id.as_deref(), Some("bar-0"));
        assert_eq!(charts[0].title.as_deref(), Some("Client totals"));
        assert_eq!(charts[0].engine_name.as_deref(), Some("highcharts"));
        assert_eq!(charts[1].id.as_deref(), Some("pie-1"));
        assert_eq!(charts[1].title.as_deref(), Some("Share"));
        assert_eq!(charts[1].engine_name.as_deref(), Some("chartsjs"));
    }

    #[test]
    fn test_column_data_serializes_type() {
        let column = ColumnData {
            name: "__total__".to_string(),
            computation_field: "__total__".to_string(),
            verbose_name: "Sum of value".to_string(),
            visible: true,
            column_type: "number".to_string(),
            is_summable: true,
        };
        let json = serde_json::to_value(&column).unwrap();
        assert_eq!(json["type"], "number");
        assert_eq!(json["computation_field"], "__total__");
    }
}
