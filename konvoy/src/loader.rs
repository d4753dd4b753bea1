use crate::errors::{Error, Result};

use log;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/*
 * One manifest file of an extends chain, still untyped: validation only
 * happens once the whole chain is merged.
 */
#[derive(Clone, Debug)]
pub struct RawManifest {
    pub path: PathBuf,
    pub tree: Value,
}

fn read(path: &Path) -> Result<Value> {
    let content = match fs::read_to_string(path) {
	Ok(content) => content,
	Err(err) if err.kind() == ErrorKind::NotFound => {
	    return Err(Error::ManifestNotFound(path.to_path_buf()));
	},
	Err(err) => {
	    return Err(Error::InvalidManifest{ path: path.to_path_buf(), reason: err.to_string() });
	}
    };

    let tree: Value = serde_json::from_str(&content)
	.map_err(|err| Error::InvalidManifest{ path: path.to_path_buf(), reason: err.to_string() })?;

    if !tree.is_object() {
	let reason = String::from("expected a JSON object at the top level");
	return Err(Error::InvalidManifest{ path: path.to_path_buf(), reason });
    }
    Ok(tree)
}

fn extends_of(raw: &RawManifest) -> Result<Option<PathBuf>> {
    let parent = match raw.tree.get("extends") {
	None | Some(Value::Null) => return Ok(None),
	Some(Value::String(parent)) => parent,
	Some(other) => {
	    let reason = format!("`extends` must be a path, got: {}", other);
	    return Err(Error::InvalidManifest{ path: raw.path.clone(), reason });
	}
    };

    let base = raw.path.parent().unwrap_or_else(|| Path::new("."));
    Ok(Some(base.join(parent)))
}

/*
 * Reads the manifest at `path` and every parent it extends.  The chain is
 * returned child-first: `[leaf, parent, grandparent, ...]`.  Each `extends`
 * is resolved relative to the directory of the file declaring it.
 */
pub fn load(path: &Path) -> Result<Vec<RawManifest>> {
    let mut chain: Vec<RawManifest> = vec![];
    let mut seen: Vec<PathBuf> = vec![];
    let mut next = Some(path.to_path_buf());

    while let Some(path) = next {
	let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
	if seen.contains(&canonical) {
	    let cycle: Vec<String> = chain.iter().map(|m| m.path.display().to_string()).collect();
	    let reason = format!("extends cycle: {} -> {}", cycle.join(" -> "), path.display());
	    return Err(Error::InvalidManifest{ path, reason });
	}

	log::debug!("Loading manifest {}", path.display());
	let raw = RawManifest{ tree: read(&path)?, path };
	next = extends_of(&raw)?;

	seen.push(canonical);
	chain.push(raw);
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
	let path = dir.join(name);
	if let Some(parent) = path.parent() {
	    fs::create_dir_all(parent).unwrap();
	}
	fs::write(&path, content).unwrap();
	path
    }

    #[test]
    fn test_load_single_manifest() {
	let dir = TempDir::new().unwrap();
	let path = write(dir.path(), "shop.json", r#"{"name": "shop", "services": []}"#);

	let chain = load(&path).unwrap();
	assert_eq!(chain.len(), 1);
	assert_eq!(chain[0].tree["name"], "shop");
    }

    #[test]
    fn test_load_walks_extends_child_first() {
	let dir = TempDir::new().unwrap();
	write(dir.path(), "base/root.json", r#"{"name": "root"}"#);
	write(dir.path(), "base/parent.json", r#"{"name": "parent", "extends": "root.json"}"#);
	let leaf = write(dir.path(), "envs/prod.json", r#"{"name": "prod", "extends": "../base/parent.json"}"#);

	let chain = load(&leaf).unwrap();
	let names: Vec<&str> = chain.iter().map(|m| m.tree["name"].as_str().unwrap()).collect();
	assert_eq!(names, vec!["prod", "parent", "root"]);
    }

    #[test]
    fn test_load_missing_parent() {
	let dir = TempDir::new().unwrap();
	let leaf = write(dir.path(), "prod.json", r#"{"name": "prod", "extends": "nope.json"}"#);

	match load(&leaf) {
	    Err(Error::ManifestNotFound(path)) => assert!(path.ends_with("nope.json")),
	    other => panic!("expected ManifestNotFound, got {:?}", other),
	}
    }

    #[test]
    fn test_load_invalid_json() {
	let dir = TempDir::new().unwrap();
	let path = write(dir.path(), "broken.json", r#"{"name": "#);

	assert!(matches!(load(&path), Err(Error::InvalidManifest{ .. })));
    }

    #[test]
    fn test_load_detects_cycles() {
	let dir = TempDir::new().unwrap();
	write(dir.path(), "a.json", r#"{"name": "a", "extends": "b.json"}"#);
	let b = write(dir.path(), "b.json", r#"{"name": "b", "extends": "a.json"}"#);

	match load(&b) {
	    Err(Error::InvalidManifest{ reason, .. }) => assert!(reason.contains("cycle")),
	    other => panic!("expected a cycle error, got {:?}", other),
	}
    }
}
