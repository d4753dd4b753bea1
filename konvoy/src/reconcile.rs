use crate::configmerge;
use crate::errors::{Error, Result};
use crate::quantity;
use konvoy_api as api;

use log;

#[derive(Clone, Debug, Default)]
pub struct ReconcileOptions {

    /* delete live config keys the manifest does not declare */
    pub prune: bool,
}

/*
 * An app that could not be reconciled; the other apps still are.
 */
#[derive(Debug)]
pub struct AppError {
    pub app: String,
    pub error: Error,
}

/*
 * The outcome of comparing desired and observed state.  Nothing has been
 * touched yet: turning a plan into cluster calls is the orchestrator's job.
 */
#[derive(Debug, Default)]
pub struct Plan {
    pub to_create: Vec<api::AppSpec>,
    pub to_update: Vec<api::ChangeSet>,
    pub skipped: Vec<AppError>,
}

impl Plan {

    pub fn changes(&self) -> impl Iterator<Item = &api::ChangeSet> {
	self.to_update.iter().filter(|changes| changes.has_change)
    }
}

fn require_port(app: &api::AppSpec) -> Result<()> {
    if app.routable && app.port().is_none() {
	return Err(Error::MissingPort(app.name.clone()));
    }
    Ok(())
}

fn sorted(domains: &[String]) -> Vec<String> {
    let mut domains = domains.to_vec();
    domains.sort();
    domains
}

fn same_quantity(desired: &Option<String>, observed: &Option<String>) -> bool {
    match (desired, observed) {
	(Some(desired), Some(observed)) => quantity::equivalent(desired, observed),
	(desired, observed) => desired == observed,
    }
}

/* limits compared by amount, as the apiserver rewrites their text */
fn same_resources(desired: &api::Resources, observed: Option<&api::Resources>) -> bool {
    let observed = observed.cloned().unwrap_or_default();
    same_quantity(&desired.cpu, &observed.cpu) && same_quantity(&desired.mem, &observed.mem)
}

fn check_new(app: &api::AppSpec) -> Result<()> {
    if app.image.is_none() {
	return Err(Error::MissingImage(app.name.clone()));
    }
    require_port(app)
}

/*
 * Compares one desired app against its live counterpart.
 */
fn diff(app: &api::AppSpec, observed: &api::ObservedApp, options: &ReconcileOptions) -> Result<api::ChangeSet> {
    require_port(app)?;

    /* without an image in the manifest, whatever runs stays */
    let mut effective = app.clone();
    if effective.image.is_none() {
	effective.image = Some(observed.image.clone());
	effective.image_tag = Some(observed.image_tag.clone());
    }
    let mut changes = api::ChangeSet::new(effective);

    let current = observed.image_ref();
    if let Some(wanted) = changes.app.image_parts() {
	if wanted != current {
	    changes.image_change = Some(api::Transition::new(current, wanted));
	}
    }

    if app.routable != observed.routable {
	changes.routable_change = Some(api::Transition::new(observed.routable, app.routable));
    } else if app.routable && sorted(&app.domains) != sorted(&observed.domains) {
	changes.domains_change = Some(api::Transition::new(observed.domains.clone(), app.domains.clone()));
    }

    if app.liveness_health_check != observed.liveness_health_check {
	changes.health_check_change = Some(api::Transition::new(
	    observed.liveness_health_check.clone(),
	    app.liveness_health_check.clone(),
	));
    }

    if let Some(resources) = &app.resources {
	if !same_resources(resources, observed.resources.as_ref()) {
	    changes.resources_change = Some(api::Transition::new(observed.resources.clone(), app.resources.clone()));
	}
    }

    if let Some(delta) = configmerge::merge_config(&observed.env, &app.config(), options.prune) {
	changes.config_changes = configmerge::config_changes(&observed.env, &delta);
	changes.config_delta = Some(delta);
    }

    Ok(changes.seal())
}

/*
 * Partitions the desired apps into the ones to create and the ones to
 * update, in declaration order.  Apps that cannot be reconciled (missing
 * PORT or image) are reported in `skipped` and left out of both lists.
 */
pub fn reconcile(desired: &[&api::AppSpec], observed: &[api::ObservedApp], options: &ReconcileOptions) -> Plan {
    let mut plan = Plan::default();

    for app in desired {
	let outcome = match observed.iter().find(|live| live.name == app.name) {
	    None => check_new(app).map(|_| plan.to_create.push((*app).clone())),
	    Some(live) => diff(app, live, options).map(|changes| {
		log::debug!("App {} has changes: {}", app.name, changes.has_change);
		plan.to_update.push(changes)
	    }),
	};

	if let Err(error) = outcome {
	    log::error!("Skipping app {}: {}", app.name, error);
	    plan.skipped.push(AppError{ app: app.name.clone(), error });
	}
    }

    plan
}
