// Legend rendering as done by Grafana's Prometheus datasource:
// https://github.com/grafana/grafana/blob/79138e211fac98bf1d12f1645ecd9fab5846f4fb/public/app/plugins/datasource/prometheus/datasource.ts#L263

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

const METRIC_NAME_LABEL: &str = "__name__";

fn alias_regex() -> &'static Regex {
    static ALIAS_RE: OnceLock<Regex> = OnceLock::new();
    ALIAS_RE.get_or_init(|| Regex::new(r"\{\{\s*(.+?)\s*\}\}").expect("alias regex is valid"))
}

/// Substitute `{{ label }}` placeholders with values from `labels`.
/// Unknown labels render as an empty string.
pub fn render(format: &str, labels: &BTreeMap<String, String>) -> String {
    alias_regex()
        .replace_all(format, |caps: &Captures| {
            labels.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Canonical form of a label set, e.g. `up{instance="db1", job="node"}`.
pub fn label_set_string(labels: &BTreeMap<String, String>) -> String {
    let name = labels.get(METRIC_NAME_LABEL);
    let pairs: Vec<String> = labels
        .iter()
        .filter(|(k, _)| k.as_str() != METRIC_NAME_LABEL)
        .map(|(k, v)| format!("{}={:?}", k, v))
        .collect();

    match name {
        Some(name) if pairs.is_empty() => name.clone(),
        Some(name) => format!("{}{{{}}}", name, pairs.join(", ")),
        None => format!("{{{}}}", pairs.join(", ")),
    }
}

/// Series label for one result: the legend format when set, otherwise the
/// whole label set.
pub fn series_label(format: Option<&str>, labels: &BTreeMap<String, String>) -> String {
    match format {
        Some(format) => render(format, labels),
        None => label_set_string(labels),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_trims_placeholder_names() {
        let set = labels(&[("instance", "db1")]);
        assert_eq!(render("{{ instance }} load", &set), "db1 load");
        assert_eq!(render("{{instance}}", &set), "db1");
    }

    #[test]
    fn test_render_unknown_label_is_empty() {
        let set = labels(&[("instance", "db1")]);
        assert_eq!(render("[{{ missing }}]", &set), "[]");
    }

    #[test]
    fn test_label_set_string() {
        let set = labels(&[("__name__", "up"), ("job", "node"), ("instance", "db1")]);
        assert_eq!(label_set_string(&set), r#"up{instance="db1", job="node"}"#);
        assert_eq!(label_set_string(&labels(&[("__name__", "up")])), "up");
        assert_eq!(label_set_string(&labels(&[("a", "1")])), r#"{a="1"}"#);
        assert_eq!(label_set_string(&BTreeMap::new()), "{}");
    }

    #[test]
    fn test_series_label_falls_back_to_label_set() {
        let set = labels(&[("instance", "db1")]);
        assert_eq!(series_label(None, &set), r#"{instance="db1"}"#);
        assert_eq!(series_label(Some("RX {{instance}}"), &set), "RX db1");
    }
}
