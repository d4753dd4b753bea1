use crate::apply::{self, ApplyOptions, Mode, Summary};
use crate::cluster::{self, Cluster};
use crate::configmerge;
use crate::errors::Result;
use crate::reconcile::{self, ReconcileOptions};
use crate::registry::RegistryModel;

use log;
use std::collections::BTreeMap;

/*
 * Where and how a command acts, resolved from the command line.
 */
#[derive(Clone, Debug)]
pub struct Target {
    pub namespace: String,
    pub apps: Vec<String>,
    pub mode: Mode,
    pub secret_namespace: String,
}

#[derive(Clone, Debug)]
pub enum ConfigEdit {
    Set(Vec<(String, String)>),
    Unset(Vec<String>),
}

fn print_summary(summary: &Summary) {
    for action in &summary.planned {
	print!("{}", action);
    }

    match summary.mode {
	Mode::Preview => {
	    if !summary.planned.is_empty() {
		println!("\nPreview only, run again with --yes to apply.");
	    }
	},
	Mode::Commit => {
	    for app in &summary.succeeded {
		println!("ok     {}", app);
	    }
	}
    }
    for failure in &summary.failed {
	match &failure.step {
	    Some(step) => println!("failed {} at `{}`: {}", failure.app, step, failure.error),
	    None => println!("failed {}: {}", failure.app, failure.error),
	}
    }
}

/*
 * create/sync: observe, reconcile, then preview or apply.  With
 * `create_only`, apps that already exist are left out before reconciling,
 * so they are neither changed nor reported.  Returns whether every app
 * went through.
 */
pub async fn sync(cluster: &dyn Cluster,
		  registry: &RegistryModel,
		  target: &Target,
		  prune: bool,
		  create_only: bool) -> Result<bool> {
    let mut selected = registry.select(&target.apps)?;
    log::debug!("{} app(s) selected, {} global env key(s)", selected.len(), registry.global_env.len());
    let observed = cluster::observe(cluster, &target.namespace).await?;

    if create_only {
	selected.retain(|app| {
	    let exists = observed.iter().any(|live| live.name == app.name);
	    if exists {
		log::info!("App {} already exists, leaving it alone", app.name);
	    }
	    !exists
	});
    }

    let plan = reconcile::reconcile(&selected, &observed, &ReconcileOptions{ prune });
    for skipped in &plan.skipped {
	println!("skipped {}: {}", skipped.app, skipped.error);
    }

    let to_update = &plan.to_update[..];
    if plan.to_create.is_empty() && plan.changes().next().is_none() {
	println!("Nothing to do in namespace {}.", target.namespace);
	return Ok(plan.skipped.is_empty());
    }

    let options = ApplyOptions{
	namespace: target.namespace.clone(),
	mode: target.mode,
	secret_namespace: target.secret_namespace.clone(),
    };
    let summary = apply::apply(cluster, &plan.to_create, to_update, &options, apply::default_change_cause).await;
    print_summary(&summary);

    Ok(plan.skipped.is_empty() && summary.is_success())
}

pub async fn config_get(cluster: &dyn Cluster, registry: &RegistryModel, target: &Target) -> Result<bool> {
    for app in registry.select(&target.apps)? {
	if cluster.get_deployment(&target.namespace, &app.name).await?.is_none() {
	    println!("{}: not deployed", app.name);
	    continue;
	}

	match cluster.get_config(&target.namespace, &app.name).await? {
	    Some(config) => {
		println!("{}:", app.name);
		for (key, value) in config {
		    println!("  {}={}", key, value);
		}
	    },
	    None => println!("{}: no config", app.name),
	}
    }
    Ok(true)
}

/*
 * config set/unset: edits the live config of each selected app through the
 * config merge, so `unset` is an explicit prune.
 */
pub async fn config_edit(cluster: &dyn Cluster, registry: &RegistryModel, target: &Target, edit: &ConfigEdit) -> Result<bool> {
    let mut ok = true;

    for app in registry.select(&target.apps)? {
	if cluster.get_deployment(&target.namespace, &app.name).await?.is_none() {
	    println!("{}: not deployed, config left alone", app.name);
	    continue;
	}

	let existing = cluster.get_config(&target.namespace, &app.name).await?.unwrap_or_default();

	let (desired, prune) = match edit {
	    ConfigEdit::Set(pairs) => {
		let mut desired = existing.clone();
		desired.extend(pairs.iter().cloned());
		(desired, false)
	    },
	    ConfigEdit::Unset(keys) => {
		let desired: BTreeMap<String, String> = existing.iter()
		    .filter(|(key, _)| !keys.contains(key))
		    .map(|(key, value)| (key.clone(), value.clone()))
		    .collect();
		(desired, true)
	    },
	};

	let delta = match configmerge::merge_config(&existing, &desired, prune) {
	    Some(delta) => delta,
	    None => {
		println!("{}: config unchanged", app.name);
		continue;
	    }
	};

	let changes: Vec<String> = configmerge::config_changes(&existing, &delta).iter().map(|c| c.to_string()).collect();
	println!("{}: config {}", app.name, changes.join(" "));

	if target.mode == Mode::Commit {
	    if let Err(err) = cluster.set_config(&target.namespace, &app.name, &configmerge::resolved(&delta)).await {
		log::error!("Unable to write config of {}: {}", app.name, err);
		println!("failed {}: {}", app.name, err);
		ok = false;
	    }
	}
    }
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testing::FakeCluster;
    use crate::interpolate::Scope;
    use crate::validate;
    use konvoy_api as api;
    use serde_json::json;

    fn registry(tree: serde_json::Value) -> RegistryModel {
	RegistryModel::new(validate::validate(&tree).unwrap(), &Scope::default()).unwrap()
    }

    fn target(mode: Mode) -> Target {
	Target{
	    namespace: "ns1".to_string(),
	    apps: vec![],
	    mode,
	    secret_namespace: "default".to_string(),
	}
    }

    fn deployed(name: &str, tag: &str) -> api::AppSpec {
	api::AppSpec{
	    name: name.to_string(),
	    image: Some("img".to_string()),
	    image_tag: Some(tag.to_string()),
	    env: BTreeMap::from([("PORT".to_string(), Some("8080".to_string()))]),
	    ..Default::default()
	}
    }

    #[tokio::test]
    async fn test_sync_upgrades_and_exposes_app() {
	let registry = registry(json!({
	    "name": "ns1",
	    "services": [{"name": "svc1", "image": "img", "imageTag": "v1", "env": {"PORT": "8080"}, "routable": true}]
	}));
	let cluster = FakeCluster::default().with_app("ns1", &deployed("svc1", "v0"));

	assert!(sync(&cluster, &registry, &target(Mode::Preview), false, false).await.unwrap());
	assert!(cluster.calls().is_empty());

	assert!(sync(&cluster, &registry, &target(Mode::Commit), false, false).await.unwrap());
	assert_eq!(cluster.calls(), vec!["deployment svc1".to_string(), "service svc1".to_string()]);

	/* a second run finds nothing left to do */
	assert!(sync(&cluster, &registry, &target(Mode::Commit), false, false).await.unwrap());
	assert_eq!(cluster.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_create_leaves_existing_apps_alone() {
	let registry = registry(json!({
	    "name": "ns1",
	    "services": [
		{"name": "old", "image": "img", "imageTag": "v2", "env": {"PORT": "8080"}},
		{"name": "new", "image": "img", "imageTag": "v1"}
	    ]
	}));
	let cluster = FakeCluster::default().with_app("ns1", &deployed("old", "v1"));

	assert!(sync(&cluster, &registry, &target(Mode::Commit), false, true).await.unwrap());
	assert_eq!(cluster.calls(), vec![
	    "namespace ns1".to_string(),
	    "config new".to_string(),
	    "deployment new".to_string(),
	]);
    }

    #[tokio::test]
    async fn test_sync_reports_skipped_apps() {
	let registry = registry(json!({
	    "name": "ns1",
	    "services": [{"name": "web", "image": "img", "routable": true}, {"name": "api", "image": "img"}]
	}));
	let cluster = FakeCluster::default();

	let ok = sync(&cluster, &registry, &target(Mode::Commit), false, false).await.unwrap();
	assert!(!ok);
	assert!(cluster.calls().contains(&"deployment api".to_string()));
	assert!(!cluster.calls().contains(&"deployment web".to_string()));
    }

    #[tokio::test]
    async fn test_config_set_and_unset() {
	let registry = registry(json!({"name": "ns1", "services": [{"name": "svc1"}]}));
	let cluster = FakeCluster::default().with_app("ns1", &deployed("svc1", "v1"));

	let set = ConfigEdit::Set(vec![("DEBUG".to_string(), "1".to_string())]);
	assert!(config_edit(&cluster, &registry, &target(Mode::Preview), &set).await.unwrap());
	assert!(cluster.calls().is_empty());

	assert!(config_edit(&cluster, &registry, &target(Mode::Commit), &set).await.unwrap());
	assert_eq!(cluster.configs.lock().unwrap()["svc1"].get("DEBUG").map(String::as_str), Some("1"));

	let unset = ConfigEdit::Unset(vec!["PORT".to_string()]);
	assert!(config_edit(&cluster, &registry, &target(Mode::Commit), &unset).await.unwrap());
	assert_eq!(cluster.configs.lock().unwrap()["svc1"], BTreeMap::from([("DEBUG".to_string(), "1".to_string())]));
	assert_eq!(cluster.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_create_ignores_problems_of_existing_apps() {
	let registry = registry(json!({
	    "name": "ns1",
	    "services": [
		{"name": "old", "image": "img", "routable": true},
		{"name": "new", "image": "img", "imageTag": "v1"}
	    ]
	}));
	let cluster = FakeCluster::default().with_app("ns1", &deployed("old", "v1"));

	assert!(sync(&cluster, &registry, &target(Mode::Commit), false, true).await.unwrap());
	assert!(!cluster.calls().iter().any(|call| call.ends_with(" old")));

	/* sync does reconcile the existing app and reports it */
	assert!(!sync(&cluster, &registry, &target(Mode::Commit), false, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_config_edit_skips_undeployed_apps() {
	let registry = registry(json!({"name": "ns1", "services": [{"name": "svc1"}, {"name": "ghost"}]}));
	let cluster = FakeCluster::default().with_app("ns1", &deployed("svc1", "v1"));

	let set = ConfigEdit::Set(vec![("DEBUG".to_string(), "1".to_string())]);
	assert!(config_edit(&cluster, &registry, &target(Mode::Commit), &set).await.unwrap());
	assert_eq!(cluster.calls(), vec!["config svc1".to_string()]);
	assert!(!cluster.configs.lock().unwrap().contains_key("ghost"));
    }
}
