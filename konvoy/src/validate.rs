use crate::errors::{Error, Result};
use konvoy_api as api;

use jsonschema::Draft;
use log;
use schemars::schema_for;
use serde_json::Value;

/*
 * `/services/0/name` -> `services[0].name`.  The document tells list
 * indices apart from map keys.
 */
fn readable_path(tree: &Value, pointer: &str) -> String {
    let mut path = String::new();
    let mut node = Some(tree);

    for token in pointer.split('/').skip(1) {
	let token = token.replace("~1", "/").replace("~0", "~");
	match node {
	    Some(Value::Array(items)) => {
		path.push_str(&format!("[{}]", token));
		node = token.parse::<usize>().ok().and_then(|idx| items.get(idx));
	    },
	    other => {
		if !path.is_empty() {
		    path.push('.');
		}
		path.push_str(&token);
		node = other.and_then(|value| value.get(&token));
	    },
	}
    }

    if path.is_empty() { String::from("manifest") } else { path }
}

/*
 * Validates a merged manifest tree and turns it into the typed model.
 * The schema is the one schemars derives from the typed manifest, so
 * unknown fields are rejected at every level and `name` is required for
 * the manifest and each of its services.  Every violation is collected,
 * not just the first one deserialization would stop at.
 */
pub fn validate(tree: &Value) -> Result<api::Manifest> {
    let schema = serde_json::to_value(schema_for!(api::Manifest))
	.map_err(|err| Error::Other(format!("cannot render the manifest schema: {}", err)))?;
    let validator = jsonschema::options()
	.with_draft(Draft::Draft7)
	.build(&schema)
	.map_err(|err| Error::Other(format!("cannot build the manifest validator: {}", err)))?;

    let mut violations = vec![];
    let mut raw = vec![];
    for err in validator.iter_errors(tree) {
	let pointer = err.instance_path.to_string();
	violations.push(format!("{}: {}", readable_path(tree, &pointer), err));
	raw.push(format!("{} ({}): {}", pointer, err.schema_path, err));
    }

    if !violations.is_empty() {
	log::debug!("Manifest failed validation with {} violation(s)", violations.len());
	return Err(Error::Schema{ violations, message: raw.join("\n") });
    }

    serde_json::from_value(tree.clone())
	.map_err(|err| Error::Schema{ violations: vec![err.to_string()], message: err.to_string() })
}
