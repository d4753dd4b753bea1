use crate::cluster::{Cluster, ServiceRequest};
use crate::configmerge;
use crate::errors::{Error, Result};
use crate::resources;
use konvoy_api as api;

use futures::future;
use log;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /* describe what would happen, never mutate */
    Preview,
    Commit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    Update,
}

/*
 * One cluster mutation.  The steps of an app run in the order they are
 * planned; each one assumes the previous ones went through.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    EnsureNamespace,
    CopySecret { secret: String, from_namespace: String },
    WriteConfig(BTreeMap<String, String>),
    ApplyDeployment,
    EnsureService(ServiceRequest),
    DeleteService,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	match self {
	    Step::EnsureNamespace => write!(f, "ensure namespace"),
	    Step::CopySecret{ secret, from_namespace } => write!(f, "copy secret {} from {}", secret, from_namespace),
	    Step::WriteConfig(config) => write!(f, "write config ({} keys)", config.len()),
	    Step::ApplyDeployment => write!(f, "apply deployment"),
	    Step::EnsureService(service) => write!(f, "ensure service on port {}", service.port),
	    Step::DeleteService => write!(f, "delete service"),
	}
    }
}

/*
 * Where an app's sequence got to.  A sequence only moves forward; `Failed`
 * keeps the last stage that was reached.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Pending,
    NamespaceEnsured,
    SecretCopied,
    ConfigWritten,
    DeploymentApplied,
    ServiceApplied,
    Done,
}

impl Step {
    fn completes(&self) -> Stage {
	match self {
	    Step::EnsureNamespace => Stage::NamespaceEnsured,
	    Step::CopySecret{ .. } => Stage::SecretCopied,
	    Step::WriteConfig(_) => Stage::ConfigWritten,
	    Step::ApplyDeployment => Stage::DeploymentApplied,
	    Step::EnsureService(_) | Step::DeleteService => Stage::ServiceApplied,
	}
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppAction {
    pub app: api::AppSpec,
    pub kind: ActionKind,
    pub changes: Vec<String>,
    pub steps: Vec<Step>,
    pub change_cause: String,
}

impl fmt::Display for AppAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	let marker = match self.kind {
	    ActionKind::Create => '+',
	    ActionKind::Update => '~',
	};
	writeln!(f, "{} {}", marker, self.app.name)?;
	for change in &self.changes {
	    writeln!(f, "    {}", change)?;
	}
	Ok(())
    }
}

#[derive(Debug)]
pub struct AppFailure {
    pub app: String,

    /* None when the sequence could not even be planned */
    pub step: Option<Step>,
    pub reached: Stage,
    pub error: Error,
}

#[derive(Debug)]
pub struct Summary {
    pub mode: Mode,
    pub planned: Vec<AppAction>,
    pub succeeded: Vec<String>,
    pub failed: Vec<AppFailure>,
}

impl Summary {
    pub fn is_success(&self) -> bool {
	self.failed.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct ApplyOptions {
    pub namespace: String,
    pub mode: Mode,

    /* namespace image pull secrets are copied from */
    pub secret_namespace: String,
}

/*
 * Default `kubernetes.io/change-cause`: what konvoy is about to do.
 */
pub fn default_change_cause(app: &str, changes: &[String]) -> String {
    format!("konvoy {}: {}", app, changes.join("; "))
}

fn service_request(app: &api::AppSpec) -> Result<ServiceRequest> {
    let port = app.port().ok_or_else(|| Error::MissingPort(app.name.clone()))?;

    Ok(ServiceRequest{
	name: app.name.clone(),
	port: resources::parse_port(&app.name, port)?,
	domains: app.domains.clone(),
    })
}

fn plan_create(app: &api::AppSpec, options: &ApplyOptions) -> Result<(Vec<String>, Vec<Step>)> {
    let mut steps = vec![Step::EnsureNamespace];

    if let Some(registry) = app.registry() {
	log::debug!("App {} pulls from registry {}", app.name, registry);
    }
    if let Some(secret) = &app.image_pull_secret {
	steps.push(Step::CopySecret{
	    secret: secret.clone(),
	    from_namespace: options.secret_namespace.clone(),
	});
    }
    steps.push(Step::WriteConfig(app.config()));
    steps.push(Step::ApplyDeployment);
    if app.routable {
	steps.push(Step::EnsureService(service_request(app)?));
    }

    let image = app.image_ref().unwrap_or_default();
    Ok((vec![format!("create {}", image)], steps))
}

fn plan_update(changes: &api::ChangeSet) -> Result<Vec<Step>> {
    let mut steps = vec![];

    if let Some(delta) = &changes.config_delta {
	steps.push(Step::WriteConfig(configmerge::resolved(delta)));
    }
    if changes.needs_deployment_patch() {
	steps.push(Step::ApplyDeployment);
    }
    if changes.needs_service_change() {
	if changes.app.routable {
	    steps.push(Step::EnsureService(service_request(&changes.app)?));
	} else {
	    steps.push(Step::DeleteService);
	}
    }
    Ok(steps)
}

/*
 * Turns a reconciliation outcome into per-app step sequences.  Apps whose
 * sequence cannot even be planned are reported as failures.
 */
pub fn plan_actions<F>(to_create: &[api::AppSpec],
		       to_update: &[api::ChangeSet],
		       options: &ApplyOptions,
		       change_cause: F) -> (Vec<AppAction>, Vec<AppFailure>)
where
    F: Fn(&str, &[String]) -> String,
{
    let mut actions = vec![];
    let mut failures = vec![];

    let planned = to_create.iter()
	.map(|app| (app.clone(), ActionKind::Create, plan_create(app, options)))
	.chain(to_update.iter()
	       .filter(|changes| changes.has_change)
	       .map(|changes| (changes.app.clone(), ActionKind::Update, plan_update(changes).map(|steps| (changes.describe(), steps)))));

    for (app, kind, outcome) in planned {
	match outcome {
	    Ok((changes, steps)) => {
		let cause = change_cause(&app.name, &changes);
		actions.push(AppAction{ app, kind, changes, steps, change_cause: cause });
	    },
	    Err(error) => {
		log::error!("Unable to plan changes for app {}: {}", app.name, error);
		failures.push(AppFailure{ app: app.name, step: None, reached: Stage::Pending, error });
	    }
	}
    }

    (actions, failures)
}

async fn run_step(cluster: &dyn Cluster, namespace: &str, action: &AppAction, step: &Step) -> Result<()> {
    let name = action.app.name.as_str();
    log::debug!("{}/{}: {}", namespace, name, step);

    match step {
	Step::EnsureNamespace => {
	    if cluster.create_namespace(namespace, false).await? {
		log::info!("Created namespace {}", namespace);
	    }
	},
	Step::CopySecret{ secret, from_namespace } => {
	    if !cluster.copy_secret(secret, from_namespace, namespace).await? {
		return Err(Error::Cluster(format!("image pull secret {}/{} not found", from_namespace, secret)));
	    }
	},
	Step::WriteConfig(config) => cluster.set_config(namespace, name, config).await?,
	Step::ApplyDeployment => {
	    cluster.create_or_update_deployment(namespace, &action.app, &action.change_cause).await?
	},
	Step::EnsureService(service) => {
	    if cluster.ensure_service(namespace, service).await? {
		log::info!("Created service {}/{}", namespace, name);
	    }
	},
	Step::DeleteService => {
	    if !cluster.delete_service(namespace, name).await? {
		log::warn!("Service {}/{} was already gone", namespace, name);
	    }
	},
    }
    Ok(())
}

/*
 * Runs one app's steps in order.  The first failing step ends the sequence;
 * there is no rollback of the steps that went through.
 */
async fn run_action(cluster: &dyn Cluster, namespace: &str, action: &AppAction) -> Result<Stage, AppFailure> {
    let mut stage = Stage::Pending;

    for step in &action.steps {
	if let Err(error) = run_step(cluster, namespace, action, step).await {
	    return Err(AppFailure{ app: action.app.name.clone(), step: Some(step.clone()), reached: stage, error });
	}
	stage = step.completes();
    }
    Ok(Stage::Done)
}

/*
 * Applies the creations and updates.  In preview mode nothing is sent to
 * the cluster.  In commit mode the apps run concurrently, each one through
 * its own ordered sequence; a failing app does not stop the others.
 */
pub async fn apply<F>(cluster: &dyn Cluster,
		      to_create: &[api::AppSpec],
		      to_update: &[api::ChangeSet],
		      options: &ApplyOptions,
		      change_cause: F) -> Summary
where
    F: Fn(&str, &[String]) -> String,
{
    let (planned, mut failed) = plan_actions(to_create, to_update, options, change_cause);
    let mut succeeded = vec![];

    if options.mode == Mode::Commit {
	let sequences = planned.iter().map(|action| run_action(cluster, &options.namespace, action));

	for outcome in future::join_all(sequences).await {
	    match outcome {
		Ok(_) => {},
		Err(failure) => {
		    log::error!("App {} failed after reaching {:?}: {}", failure.app, failure.reached, failure.error);
		    failed.push(failure);
		}
	    }
	}

	succeeded = planned.iter()
	    .map(|action| action.app.name.clone())
	    .filter(|name| !failed.iter().any(|failure| &failure.app == name))
	    .collect();
    }

    Summary{ mode: options.mode, planned, succeeded, failed }
}
