//! Continuation cursor handling for the query API.
//!
//! Depending on server version a response carries either a modern
//! `continue` object or a legacy `query-continue` map; both are flattened
//! into the parameter set for the follow-up request. Prop-specific
//! cursors also decide which lists may be merged from a continuation
//! page, because the API re-emits non-continued props from the start.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::MergeProps;

/// The outer generator cursor, handled by the caller rather than drained
/// inline.
pub const GAP_CONTINUE: &str = "gapcontinue";

/// Extract the parameters to echo back on the next request.
///
/// Returns `None` when the response carries no continuation at all.
pub fn continuation_params(response: &Value) -> Option<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();

    if let Some(cont) = response.get("continue").and_then(|c| c.as_object()) {
        for (key, value) in cont {
            if let Some(v) = value_as_string(value) {
                params.insert(key.clone(), v);
            }
        }
    }

    if let Some(legacy) = response.get("query-continue").and_then(|c| c.as_object()) {
        for module in legacy.values() {
            if let Some(cursors) = module.as_object() {
                for (key, value) in cursors {
                    if let Some(v) = value_as_string(value) {
                        params.insert(key.clone(), v);
                    }
                }
            }
        }
    }

    if params.is_empty() {
        None
    } else {
        Some(params)
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Which props a continuation page is allowed to merge, based on the
/// cursors present in the request that produced it.
pub fn merge_props_for(params: &BTreeMap<String, String>) -> MergeProps {
    let mut props = MergeProps::default();
    let mut any = false;
    for key in params.keys() {
        match key.as_str() {
            "rvcontinue" => {
                props.revisions = true;
                any = true;
            }
            "cocontinue" => {
                props.coordinates = true;
                any = true;
            }
            "clcontinue" => {
                props.categories = true;
                any = true;
            }
            "rdcontinue" => {
                props.redirects = true;
                any = true;
            }
            "picontinue" => {
                props.page_images = true;
                any = true;
            }
            _ => {}
        }
    }
    // A generator-only continuation introduces new pages; everything on
    // them is fresh.
    if any {
        props
    } else {
        MergeProps::all()
    }
}

/// Split the outer generator cursor away from the prop cursors.
pub fn split_gap_continue(
    mut params: BTreeMap<String, String>,
) -> (Option<String>, BTreeMap<String, String>) {
    let gap = params.remove(GAP_CONTINUE);
    (gap, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_modern_continue() {
        let response = json!({
            "continue": { "clcontinue": "123|Foo", "continue": "||" }
        });
        let params = continuation_params(&response).expect("has continuation");
        assert_eq!(params.get("clcontinue").map(|s| s.as_str()), Some("123|Foo"));
        assert_eq!(params.get("continue").map(|s| s.as_str()), Some("||"));
    }

    #[test]
    fn test_legacy_query_continue() {
        let response = json!({
            "query-continue": {
                "allpages": { "gapcontinue": "Bar" },
                "categories": { "clcontinue": "9|X" }
            }
        });
        let params = continuation_params(&response).expect("has continuation");
        assert_eq!(params.get("gapcontinue").map(|s| s.as_str()), Some("Bar"));
        assert_eq!(params.get("clcontinue").map(|s| s.as_str()), Some("9|X"));
    }

    #[test]
    fn test_no_continuation() {
        assert!(continuation_params(&json!({ "query": {} })).is_none());
    }

    #[test]
    fn test_merge_props_follow_cursors() {
        let mut params = BTreeMap::new();
        params.insert("clcontinue".to_string(), "x".to_string());
        params.insert("continue".to_string(), "||".to_string());
        let props = merge_props_for(&params);
        assert!(props.categories);
        assert!(!props.redirects);
        assert!(!props.coordinates);
    }

    #[test]
    fn test_generator_only_continuation_merges_all() {
        let mut params = BTreeMap::new();
        params.insert("continue".to_string(), "-||".to_string());
        assert_eq!(merge_props_for(&params), MergeProps::all());
    }

    #[test]
    fn test_split_gap_continue() {
        let mut params = BTreeMap::new();
        params.insert("gapcontinue".to_string(), "Tok".to_string());
        params.insert("clcontinue".to_string(), "x".to_string());
        let (gap, rest) = split_gap_continue(params);
        assert_eq!(gap.as_deref(), Some("Tok"));
        assert_eq!(rest.len(), 1);
    }
}
