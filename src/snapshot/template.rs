use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Replace every literal `$name` in the raw dashboard text with its value.
///
/// Runs on text before JSON parsing. Values are inserted verbatim: a value
/// containing `"` or `\` is not escaped and can break the document.
pub fn substitute(raw: &str, vars: &HashMap<String, String>) -> String {
    let mut text = raw.to_string();
    for (name, value) in vars {
        let token = format!("${}", name);
        debug!("Replacing \"{}\" with \"{}\"", token, value);
        text = text.replace(&token, value);
    }
    text
}

/// Current values of the dashboard's template variables, as found in
/// `templating.list[].current.text`. `+` separated selections become regex
/// alternations.
pub fn query_variables(templating_list: &[Value]) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for variable in templating_list {
        let Some(name) = variable.get("name").and_then(Value::as_str) else {
            continue;
        };
        let text = match variable.get("current").and_then(|c| c.get("text")) {
            Some(Value::String(s)) => s.replace('+', "|"),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("|"),
            _ => continue,
        };
        vars.insert(name.to_string(), text);
    }
    vars
}

/// Expand `^[[name]]$` regex placeholders in a query expression. `All`
/// matches everything.
pub fn expand_query(expr: &str, vars: &HashMap<String, String>) -> String {
    let mut expr = expr.to_string();
    for (name, value) in vars {
        let placeholder = format!("^[[{}]]$", name);
        if !expr.contains(&placeholder) {
            continue;
        }
        let replacement = if value == "All" { "^.*$" } else { value.as_str() };
        expr = expr.replace(&placeholder, replacement);
    }
    expr
}
