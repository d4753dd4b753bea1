use crate::loader::RawManifest;

use serde_json::Map;
use serde_json::Value;

/*
 * Recursively merges `source` into `target`: objects are merged key by key,
 * anything else (scalars, arrays, null) in `source` replaces what `target`
 * had.  Explicit nulls are kept so they can later act as delete markers.
 */
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
	(Value::Object(target), Value::Object(source)) => {
	    for (key, value) in source {
		match target.get_mut(key) {
		    Some(existing) => deep_merge(existing, value),
		    None => {
			target.insert(key.clone(), value.clone());
		    }
		}
	    }
	},
	(target, source) => *target = source.clone(),
    }
}

fn app_name(app: &Value) -> Option<&str> {
    app.get("name").and_then(Value::as_str)
}

/*
 * Merges a `services` list by app name.  Apps already known are deep-merged
 * with the newer declaration winning key by key, new apps are appended so
 * the result keeps declaration order (root-most file first).
 */
fn merge_services(target: &mut Value, source: &Value) {
    let source = match source {
	Value::Array(apps) => apps,
	other => {
	    /* not a list: let the validator report it */
	    *target = other.clone();
	    return;
	}
    };
    if !target.is_array() {
	*target = Value::Array(vec![]);
    }

    if let Value::Array(merged) = target {
	for app in source {
	    let existing = app_name(app)
		.and_then(|name| merged.iter_mut().find(|known| app_name(known) == Some(name)));

	    match existing {
		Some(existing) => deep_merge(existing, app),
		None => merged.push(app.clone()),
	    }
	}
    }
}

/*
 * Resolves an extends chain, as returned by the loader (leaf first), into a
 * single manifest tree.  Files are applied root first so the leaf wins.
 */
pub fn merge(chain: &[RawManifest]) -> Value {
    let mut merged = Value::Object(Map::new());

    for raw in chain.iter().rev() {
	let fields = match &raw.tree {
	    Value::Object(fields) => fields,
	    _ => continue,
	};

	for (key, value) in fields {
	    if let Value::Object(target) = &mut merged {
		let slot = target.entry(key.clone()).or_insert(Value::Null);
		if key == "services" {
		    merge_services(slot, value);
		} else {
		    deep_merge(slot, value);
		}
	    }
	}
    }

    /* the chain is resolved, the link is meaningless from here */
    if let Value::Object(fields) = &mut merged {
	fields.remove("extends");
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn chain(trees: Vec<Value>) -> Vec<RawManifest> {
	trees.into_iter()
	    .enumerate()
	    .map(|(idx, tree)| RawManifest{ path: PathBuf::from(format!("{}.json", idx)), tree })
	    .collect()
    }

    #[test]
    fn test_merge_apps_by_name() {
	let leaf = json!({"name": "prod", "services": [{"name": "a", "env": {"X": "2", "Y": "3"}}]});
	let parent = json!({"name": "base", "services": [{"name": "a", "image": "img", "env": {"X": "1"}}]});

	let merged = merge(&chain(vec![leaf, parent]));
	assert_eq!(merged, json!({
	    "name": "prod",
	    "services": [{"name": "a", "image": "img", "env": {"X": "2", "Y": "3"}}],
	}));
    }

    #[test]
    fn test_merge_keeps_null_markers() {
	let leaf = json!({"name": "prod", "env": {"X": null}, "services": [{"name": "a", "env": {"Z": null}}]});
	let parent = json!({"name": "base", "env": {"X": "1"}, "services": [{"name": "a", "env": {"Z": "1"}}]});

	let merged = merge(&chain(vec![leaf, parent]));
	assert_eq!(merged["env"], json!({"X": null}));
	assert_eq!(merged["services"][0]["env"], json!({"Z": null}));
    }

    #[test]
    fn test_merge_appends_new_apps_in_declaration_order() {
	let leaf = json!({"name": "prod", "services": [{"name": "c"}, {"name": "a", "routable": true}]});
	let parent = json!({"name": "base", "services": [{"name": "a"}, {"name": "b"}]});

	let merged = merge(&chain(vec![leaf, parent]));
	let names: Vec<&str> = merged["services"].as_array().unwrap()
	    .iter()
	    .map(|app| app["name"].as_str().unwrap())
	    .collect();
	assert_eq!(names, vec!["a", "b", "c"]);
	assert_eq!(merged["services"][0]["routable"], json!(true));
    }

    #[test]
    fn test_merge_deep_merges_resources() {
	let leaf = json!({"name": "prod", "services": [{"name": "a", "resources": {"mem": "512Mi"}}]});
	let parent = json!({"name": "base", "services": [{"name": "a", "resources": {"cpu": "1", "mem": "256Mi"}}]});

	let merged = merge(&chain(vec![leaf, parent]));
	assert_eq!(merged["services"][0]["resources"], json!({"cpu": "1", "mem": "512Mi"}));
    }

    #[test]
    fn test_merge_drops_extends_and_is_deterministic() {
	let trees = vec![
	    json!({"name": "prod", "extends": "base.json", "args": {"TAG": "v2"}}),
	    json!({"name": "base", "apiVersion": "v1", "args": {"TAG": "v1", "REGION": "eu"}}),
	];

	let first = serde_json::to_string(&merge(&chain(trees.clone()))).unwrap();
	let second = serde_json::to_string(&merge(&chain(trees))).unwrap();
	assert_eq!(first, second);

	let merged: Value = serde_json::from_str(&first).unwrap();
	assert!(merged.get("extends").is_none());
	assert_eq!(merged["apiVersion"], "v1");
	assert_eq!(merged["args"], json!({"TAG": "v2", "REGION": "eu"}));
    }
}
