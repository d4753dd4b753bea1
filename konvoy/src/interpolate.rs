use crate::errors::{Error, Result};
use konvoy_api as api;

use log;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/*
 * Snapshot of the host process environment.  Captured once at start-up and
 * handed down explicitly so nothing below `main` reads the environment.
 */
#[derive(Clone, Debug, Default)]
pub struct HostEnv {
    vars: BTreeMap<String, String>,
}

impl HostEnv {

    pub fn capture() -> Self {
	Self{ vars: std::env::vars().collect() }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
	self.vars.get(key).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HostEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
	Self{ vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

/*
 * The variables a `${NAME}` placeholder can resolve to: host environment
 * first, then the manifest/CLI `args` as defaults.
 */
#[derive(Clone, Debug, Default)]
pub struct Scope {
    pub host: HostEnv,
    pub args: BTreeMap<String, String>,

    /* a host variable named like the env key replaces the whole value */
    pub pass_host_env: bool,
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder pattern is valid"))
}

impl Scope {

    fn lookup(&self, name: &str) -> Option<&str> {
	self.host.get(name).or_else(|| self.args.get(name).map(String::as_str))
    }

    /*
     * Renders every `${NAME}` in `value`.  A placeholder that resolves to
     * nothing is an error naming the whole string.
     */
    pub fn render(&self, value: &str) -> Result<String> {
	let mut rendered = String::with_capacity(value.len());
	let mut last = 0;

	for captures in placeholder().captures_iter(value) {
	    let (whole, name) = match (captures.get(0), captures.get(1)) {
		(Some(whole), Some(name)) => (whole, name.as_str().trim()),
		_ => continue,
	    };
	    let resolved = self.lookup(name).ok_or_else(|| Error::Interpolation{
		value: value.to_string(),
		variable: name.to_string(),
	    })?;

	    rendered.push_str(&value[last..whole.start()]);
	    rendered.push_str(resolved);
	    last = whole.end();
	}
	rendered.push_str(&value[last..]);

	Ok(rendered)
    }

    pub fn render_opt(&self, value: &Option<String>) -> Result<Option<String>> {
	value.as_deref().map(|value| self.render(value)).transpose()
    }
}

/*
 * Resolves the placeholders of an env map and strips the delete markers.
 * Only values containing `${` are touched.
 */
pub fn interpolate(env: &api::EnvMap, scope: &Scope) -> Result<api::EnvMap> {
    let mut resolved = api::EnvMap::new();

    for (key, value) in env {
	let value = match value {
	    Some(value) => value,
	    None => {
		log::debug!("Dropping env key {} marked for removal", key);
		continue;
	    }
	};

	if !value.contains("${") {
	    resolved.insert(key.clone(), Some(value.clone()));
	    continue;
	}

	if scope.pass_host_env {
	    if let Some(host_value) = scope.host.get(key) {
		log::debug!("Env key {} taken from the host environment", key);
		resolved.insert(key.clone(), Some(host_value.to_string()));
		continue;
	    }
	}
	resolved.insert(key.clone(), Some(scope.render(value)?));
    }

    Ok(resolved)
}
