//! Allow-list filtering of `tools/list` results.

use serde_json::Value;
use std::collections::HashSet;

/// Retain only tools whose name is in every non-empty allow-set.
///
/// The static set comes from config, the per-request set from the
/// `x-envoy-allow-mcp-tools` header. Both empty means no restriction. Tool
/// order, `nextCursor`, and any other result keys are preserved verbatim.
pub fn filter_tools_result(
    result: &mut Value,
    config_allow: &HashSet<String>,
    header_allow: Option<&HashSet<String>>,
) {
    let header_allow = header_allow.filter(|set| !set.is_empty());
    if config_allow.is_empty() && header_allow.is_none() {
        return;
    }

    let Some(tools) = result.get_mut("tools").and_then(Value::as_array_mut) else {
        return;
    };

    tools.retain(|tool| {
        let Some(name) = tool.get("name").and_then(Value::as_str) else {
            return false;
        };
        if !config_allow.is_empty() && !config_allow.contains(name) {
            return false;
        }
        if let Some(from_header) = header_allow
            && !from_header.contains(name)
        {
            return false;
        }
        true
    });
}

/// Parse the comma-separated header override; whitespace-trimmed, empty
/// entries dropped. `None` when the header yields no usable entries.
#[must_use]
pub fn parse_allow_tools_header(raw: &str) -> Option<HashSet<String>> {
    let set: HashSet<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!set.is_empty()).then_some(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend_result() -> Value {
        json!({
            "tools": [
                {"name": "A", "description": "a"},
                {"name": "B", "description": "b"},
                {"name": "C", "description": "c"},
            ],
            "nextCursor": "page-2",
        })
    }

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn both_sets_empty_returns_input_unchanged() {
        let mut result = backend_result();
        let before = result.clone();
        filter_tools_result(&mut result, &HashSet::new(), None);
        assert_eq!(result, before);
    }

    #[test]
    fn intersection_of_config_and_header() {
        let mut result = backend_result();
        let header = set(&["A", "C"]);
        filter_tools_result(&mut result, &set(&["A", "B"]), Some(&header));
        assert_eq!(result["tools"], json!([{"name": "A", "description": "a"}]));
        // Other keys are preserved verbatim.
        assert_eq!(result["nextCursor"], json!("page-2"));
    }

    #[test]
    fn header_only_restriction_preserves_order() {
        let mut result = backend_result();
        let header = set(&["C", "B"]);
        filter_tools_result(&mut result, &HashSet::new(), Some(&header));
        let names: Vec<&str> = result["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn nameless_tools_are_dropped_under_restriction() {
        let mut result = json!({"tools": [{"description": "anonymous"}, {"name": "A"}]});
        filter_tools_result(&mut result, &set(&["A"]), None);
        assert_eq!(result["tools"], json!([{"name": "A"}]));
    }

    #[test]
    fn non_array_tools_left_untouched() {
        let mut result = json!({"tools": "oops"});
        filter_tools_result(&mut result, &set(&["A"]), None);
        assert_eq!(result["tools"], json!("oops"));
    }

    #[test]
    fn header_parsing_trims_and_drops_empties() {
        let parsed = parse_allow_tools_header(" B , C ,, ").unwrap();
        assert_eq!(parsed, set(&["B", "C"]));
        assert_eq!(parse_allow_tools_header("  , ,"), None);
        assert_eq!(parse_allow_tools_header(""), None);
    }
}
