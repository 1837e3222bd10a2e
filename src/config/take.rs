use crate::error::{Result, SnapshotError};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Which dashboard and time range to snapshot, plus the name and expiry of
/// the published snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TakeRequest {
    pub dashboard_slug: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub template_vars: Option<HashMap<String, String>>,
    /// Negative values are clamped to zero, meaning the snapshot never expires.
    pub expires: chrono::Duration,
    pub snapshot_name: Option<String>,
    pub include_annotations: Option<bool>,
    pub clear_templating: bool,
    pub query_concurrency: Option<usize>,
}

/// A validated [`TakeRequest`] with every default filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct TakeConfig {
    pub dashboard_slug: String,
    pub range: TimeRange,
    pub template_vars: HashMap<String, String>,
    pub expires: Duration,
    pub snapshot_name: String,
    pub include_annotations: bool,
    pub clear_templating: bool,
    pub query_concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from >= to {
            return Err(SnapshotError::InvalidRange {
                from: from.to_rfc3339(),
                to: to.to_rfc3339(),
            });
        }
        Ok(Self { from, to })
    }

    /// Length of the range in (fractional) seconds.
    pub fn seconds(&self) -> f64 {
        (self.to - self.from).num_milliseconds() as f64 / 1000.0
    }

    pub fn from_millis(&self) -> i64 {
        self.from.timestamp_millis()
    }

    pub fn to_millis(&self) -> i64 {
        self.to.timestamp_millis()
    }

    pub fn from_rfc3339(&self) -> String {
        self.from.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn to_rfc3339(&self) -> String {
        self.to.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

impl TakeRequest {
    pub fn new(dashboard_slug: impl Into<String>, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            dashboard_slug: dashboard_slug.into(),
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn validate(self) -> Result<TakeConfig> {
        if self.dashboard_slug.is_empty() {
            return Err(SnapshotError::MissingField("dashboard_slug"));
        }
        if self.dashboard_slug.contains(' ') {
            return Err(SnapshotError::ConfigInvalid(format!(
                "\"dashboard_slug\" contained an invalid character: \" \" ({})",
                self.dashboard_slug
            )));
        }
        let from = self.from.ok_or(SnapshotError::MissingField("from"))?;
        let to = self.to.ok_or(SnapshotError::MissingField("to"))?;
        let range = TimeRange::new(from, to)?;

        let expires = self.expires.to_std().unwrap_or(Duration::ZERO);

        let snapshot_name = match self.snapshot_name {
            Some(name) if !name.is_empty() => name,
            _ => format!("{} {}", to.format("%Y-%m-%d"), self.dashboard_slug),
        };

        Ok(TakeConfig {
            dashboard_slug: self.dashboard_slug,
            range,
            template_vars: self.template_vars.unwrap_or_default(),
            expires,
            snapshot_name,
            include_annotations: self.include_annotations.unwrap_or(true),
            clear_templating: self.clear_templating,
            query_concurrency: self.query_concurrency.unwrap_or(1).max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn from() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 2, 5, 6, 0, 0).unwrap()
    }

    fn to() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 2, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_simple_request_gets_defaults() {
        let cfg = TakeRequest::new("test-slug", from(), to()).validate().unwrap();
        assert_eq!(cfg.snapshot_name, "2017-02-05 test-slug");
        assert!(cfg.template_vars.is_empty());
        assert_eq!(cfg.expires, Duration::ZERO);
        assert!(cfg.include_annotations);
        assert!(!cfg.clear_templating);
        assert_eq!(cfg.query_concurrency, 1);
        assert_eq!(cfg.range.seconds(), 21600.0);
    }

    #[test]
    fn test_complete_request_is_kept() {
        let mut vars = HashMap::new();
        vars.insert("key1".to_string(), "val1".to_string());
        vars.insert("key2".to_string(), "val2".to_string());
        let req = TakeRequest {
            template_vars: Some(vars.clone()),
            expires: chrono::Duration::seconds(3600),
            snapshot_name: Some("My Test Snapshot".to_string()),
            include_annotations: Some(false),
            query_concurrency: Some(4),
            ..TakeRequest::new("test-slug", from(), to())
        };
        let cfg = req.validate().unwrap();
        assert_eq!(cfg.template_vars, vars);
        assert_eq!(cfg.expires, Duration::from_secs(3600));
        assert_eq!(cfg.snapshot_name, "My Test Snapshot");
        assert!(!cfg.include_annotations);
        assert_eq!(cfg.query_concurrency, 4);
    }

    #[test]
    fn test_inverted_and_empty_ranges_are_rejected() {
        let err = TakeRequest::new("test-slug", to(), from()).validate().unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidRange { .. }));

        let err = TakeRequest::new("test-slug", from(), from()).validate().unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidRange { .. }));
    }

    #[test]
    fn test_missing_required_fields() {
        let err = TakeRequest::default().validate().unwrap_err();
        assert!(matches!(err, SnapshotError::MissingField("dashboard_slug")));

        let req = TakeRequest {
            dashboard_slug: "test-slug".to_string(),
            to: Some(to()),
            ..Default::default()
        };
        assert!(matches!(req.validate().unwrap_err(), SnapshotError::MissingField("from")));
    }

    #[test]
    fn test_slug_with_space_is_rejected() {
        let err = TakeRequest::new("test slug", from(), to()).validate().unwrap_err();
        assert!(matches!(err, SnapshotError::ConfigInvalid(_)));
    }

    #[test]
    fn test_negative_expiry_is_clamped() {
        let req = TakeRequest {
            expires: chrono::Duration::seconds(-30),
            ..TakeRequest::new("test-slug", from(), to())
        };
        assert_eq!(req.validate().unwrap().expires, Duration::ZERO);
    }

    #[test]
    fn test_range_formats_rfc3339() {
        let range = TimeRange::new(from(), to()).unwrap();
        assert_eq!(range.from_rfc3339(), "2017-02-05T06:00:00Z");
        assert_eq!(range.to_millis(), 1486296000000);
    }
}
