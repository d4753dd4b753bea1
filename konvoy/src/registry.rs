use crate::errors::{Error, Result};
use crate::interpolate::{self, Scope};
use crate::loader;
use crate::merge;
use crate::validate;
use konvoy_api as api;

use glob::Pattern;
use log;
use std::collections::BTreeMap;
use std::path::Path;

/*
 * The merged, validated and interpolated service registry.  Built once per
 * run and read-only afterwards.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct RegistryModel {

    /* namespace-safe name, used as the target namespace */
    pub name: String,
    pub global_env: BTreeMap<String, String>,
    pub services: Vec<api::AppSpec>,
}

/* namespaces are DNS labels */
const MAX_NAMESPACE_LEN: usize = 63;

/*
 * Lower-cases the name and folds everything that is not alphanumeric into
 * single dashes, so it can be used as a namespace.  Long names are cut to
 * the label limit.
 */
pub fn namespace_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());

    for c in name.trim().chars() {
	if c.is_ascii_alphanumeric() {
	    normalized.push(c.to_ascii_lowercase());
	} else if !normalized.ends_with('-') {
	    normalized.push('-');
	}
    }
    let trimmed = normalized.trim_start_matches('-');
    let cut = &trimmed[..trimmed.len().min(MAX_NAMESPACE_LEN)];
    cut.trim_end_matches('-').to_string()
}

fn resolve_app(app: api::AppSpec, global_env: &api::EnvMap, scope: &Scope) -> Result<api::AppSpec> {
    let mut env = global_env.clone();
    env.extend(app.env.clone());

    let domains = app.domains.iter()
	.map(|domain| scope.render(domain))
	.collect::<Result<Vec<String>>>()?;

    Ok(api::AppSpec{
	image: scope.render_opt(&app.image)?,
	image_tag: scope.render_opt(&app.image_tag)?,
	liveness_health_check: scope.render_opt(&app.liveness_health_check)?,
	env: interpolate::interpolate(&env, scope)?,
	domains,
	..app
    })
}

impl RegistryModel {

    /*
     * Builds the model from a validated manifest.  `scope.args` are layered
     * over the manifest's own `args`.
     */
    pub fn new(manifest: api::Manifest, scope: &Scope) -> Result<Self> {
	let mut args = manifest.args.clone();
	args.extend(scope.args.clone());
	let scope = Scope{ args, ..scope.clone() };

	let global_env = interpolate::interpolate(&manifest.env, &scope)?;
	let services = manifest.services.into_iter()
	    .map(|app| resolve_app(app, &manifest.env, &scope))
	    .collect::<Result<Vec<api::AppSpec>>>()?;

	let name = namespace_name(&manifest.name);
	if name.is_empty() {
	    let reason = format!("manifest name `{}` cannot be used as a namespace", manifest.name);
	    return Err(Error::Other(reason));
	}

	Ok(Self{
	    name,
	    global_env: global_env.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect(),
	    services,
	})
    }

    /*
     * Loader -> merger -> validator -> interpolation, as one step.
     */
    pub fn from_path(path: &Path, scope: &Scope) -> Result<Self> {
	let chain = loader::load(path)?;
	log::debug!("Manifest {} resolved to a chain of {} file(s)", path.display(), chain.len());

	let merged = merge::merge(&chain);
	let manifest = validate::validate(&merged)?;
	Self::new(manifest, scope)
    }

    /*
     * Apps whose name matches any of the glob patterns, in declaration
     * order.  No pattern selects everything.
     */
    pub fn select(&self, patterns: &[String]) -> Result<Vec<&api::AppSpec>> {
	if patterns.is_empty() {
	    return Ok(self.services.iter().collect());
	}

	let compiled = patterns.iter()
	    .map(|p| Pattern::new(p).map_err(|err| Error::Other(format!("invalid app pattern `{}`: {}", p, err))))
	    .collect::<Result<Vec<Pattern>>>()?;

	for pattern in &compiled {
	    if !self.services.iter().any(|app| pattern.matches(&app.name)) {
		log::warn!("No app in {} matches `{}`", self.name, pattern.as_str());
	    }
	}

	Ok(self.services.iter()
	   .filter(|app| compiled.iter().any(|pattern| pattern.matches(&app.name)))
	   .collect())
    }
}
