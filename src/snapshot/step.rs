// Query step selection, following Grafana's Prometheus datasource:
// https://github.com/grafana/grafana/blob/79138e211fac98bf1d12f1645ecd9fab5846f4fb/public/app/plugins/datasource/prometheus/datasource.ts#L83

use crate::config::TimeRange;
use crate::error::{Result, SnapshotError};
use serde::Deserialize;

/// Data points Grafana requests per graph by default.
pub const MAX_DATA_POINTS: f64 = 500.0;
/// Prometheus refuses range queries returning more points than this.
pub const MAX_SOURCE_RESOLUTION: f64 = 11000.0;

/// The fields of a panel target the pipeline reads.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub expr: String,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub interval_factor: Option<f64>,
    #[serde(default)]
    pub legend_format: Option<String>,
}

impl Target {
    pub fn legend_format(&self) -> Option<&str> {
        self.legend_format.as_deref().filter(|f| !f.is_empty())
    }
}

/// Step in seconds for one target over `range`.
pub fn compute_step(target: &Target, range: &TimeRange) -> Result<f64> {
    let factor = target.interval_factor.unwrap_or(1.0);
    let range_secs = range.seconds();

    let step = match target.interval.as_deref().map(str::trim) {
        Some(interval) if !interval.is_empty() => parse_interval(interval)? * factor,
        _ => {
            let step = (range_secs / MAX_DATA_POINTS * factor).ceil();
            if step > 0.0 && range_secs / step > MAX_SOURCE_RESOLUTION {
                (range_secs / MAX_SOURCE_RESOLUTION).ceil()
            } else {
                step
            }
        }
    };

    if !step.is_finite() || step <= 0.0 {
        return Err(SnapshotError::InvalidStep {
            expr: target.expr.clone(),
            step,
        });
    }
    Ok(step)
}

/// Parse a target interval such as `30s`, `1m`, `1h30m` or `500ms`. Grafana's
/// `>` minimum-interval prefix is accepted and ignored.
fn parse_interval(raw: &str) -> Result<f64> {
    let trimmed = raw.trim_start_matches('>').trim();
    humantime::parse_duration(trimmed)
        .map(|d| d.as_secs_f64())
        .map_err(|e| SnapshotError::malformed("target.interval", format!("\"{}\": {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn range(seconds: i64) -> TimeRange {
        let from = DateTime::<Utc>::from_timestamp(1_486_274_400, 0).unwrap();
        TimeRange::new(from, from + chrono::Duration::seconds(seconds)).unwrap()
    }

    #[test]
    fn test_six_hours_without_interval() {
        let step = compute_step(&Target::default(), &range(21600)).unwrap();
        assert_eq!(step, 44.0);
    }

    #[test]
    fn test_interval_factor_scales_range_step() {
        let target = Target {
            interval_factor: Some(2.0),
            ..Default::default()
        };
        // ceil(21600 / 500 * 2) = ceil(86.4)
        assert_eq!(compute_step(&target, &range(21600)).unwrap(), 87.0);
    }

    #[test]
    fn test_explicit_interval_times_factor() {
        let target = Target {
            interval: Some("30s".to_string()),
            interval_factor: Some(2.0),
            ..Default::default()
        };
        assert_eq!(compute_step(&target, &range(21600)).unwrap(), 60.0);

        let target = Target {
            interval: Some(">1m".to_string()),
            ..Default::default()
        };
        assert_eq!(compute_step(&target, &range(21600)).unwrap(), 60.0);
    }

    #[test]
    fn test_empty_interval_uses_range() {
        let target = Target {
            interval: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(compute_step(&target, &range(21600)).unwrap(), 44.0);
    }

    #[test]
    fn test_resolution_clamp_only_above_limit() {
        // A small factor keeps the range step low enough to exceed 11000 points.
        let target = Target {
            interval_factor: Some(0.01),
            ..Default::default()
        };
        // ceil(86400 / 500 * 0.01) = 2 -> 43200 points > 11000 -> ceil(86400 / 11000) = 8
        assert_eq!(compute_step(&target, &range(86400)).unwrap(), 8.0);

        // ceil(21600 / 500 * 0.01) = 1 -> 21600 points > 11000 -> ceil(21600 / 11000) = 2
        assert_eq!(compute_step(&target, &range(21600)).unwrap(), 2.0);

        // ceil(3600 / 500 * 0.01) = 1 -> 3600 points, no clamp
        assert_eq!(compute_step(&target, &range(3600)).unwrap(), 1.0);

        // exactly 11000 points stays at 1s, one more second tips it to 2s
        assert_eq!(compute_step(&target, &range(11000)).unwrap(), 1.0);
        assert_eq!(compute_step(&target, &range(11001)).unwrap(), 2.0);
    }

    #[test]
    fn test_non_positive_step_is_rejected() {
        let target = Target {
            interval_factor: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(
            compute_step(&target, &range(3600)),
            Err(SnapshotError::InvalidStep { .. })
        ));

        let target = Target {
            interval: Some("0s".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            compute_step(&target, &range(3600)),
            Err(SnapshotError::InvalidStep { .. })
        ));
    }

    #[test]
    fn test_unparseable_interval() {
        let target = Target {
            interval: Some("soon".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            compute_step(&target, &range(3600)),
            Err(SnapshotError::MalformedDocument { .. })
        ));
    }

    #[test]
    fn test_target_deserializes_camel_case() {
        let target: Target = serde_json::from_value(serde_json::json!({
            "expr": "up",
            "intervalFactor": 2,
            "legendFormat": "{{instance}}",
            "refId": "A"
        }))
        .unwrap();
        assert_eq!(target.interval_factor, Some(2.0));
        assert_eq!(target.legend_format(), Some("{{instance}}"));
    }
}
