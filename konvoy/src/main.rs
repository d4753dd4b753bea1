mod apply;
mod cluster;
mod commands;
mod configmerge;
mod errors;
mod interpolate;
mod kubecluster;
mod loader;
mod merge;
mod quantity;
mod reconcile;
mod registry;
mod resources;
mod validate;

use apply::Mode;
use commands::{ConfigEdit, Target};
use errors::Result;
use interpolate::{HostEnv, Scope};
use kubecluster::KubeCluster;
use registry::RegistryModel;

use clap::{Args, Parser, Subcommand};
use kube::Client as KubeClient;
use log;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "konvoy", version, about = "Reconcile a service registry manifest with a Kubernetes cluster")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// Path of the service registry manifest
    manifest: PathBuf,

    /// Namespace to act on, instead of the one named after the manifest
    #[arg(long)]
    namespace: Option<String>,

    /// Only act on apps matching this glob (repeatable)
    #[arg(long = "app")]
    apps: Vec<String>,

    /// Apply the changes instead of previewing them
    #[arg(long, short = 'y')]
    yes: bool,

    /// Let host variables named like an env key replace its templated value
    #[arg(long)]
    pass_env: bool,

    /// Interpolation variable, overrides the manifest's `args` (repeatable)
    #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_pair)]
    args: Vec<(String, String)>,

    /// Namespace image pull secrets are copied from
    #[arg(long, env = "KONVOY_SECRET_NAMESPACE", default_value = "default")]
    secret_namespace: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the apps that are not deployed yet
    Create(TargetArgs),

    /// Create missing apps and update the ones that drifted
    #[command(alias = "apply")]
    Sync {
	#[command(flatten)]
	target: TargetArgs,

	/// Remove config keys the manifest does not declare
	#[arg(long)]
	prune: bool,
    },

    /// Read or edit the live config of apps
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Get(TargetArgs),

    Set {
	#[command(flatten)]
	target: TargetArgs,

	#[arg(value_name = "KEY=VALUE", value_parser = parse_pair, required = true)]
	pairs: Vec<(String, String)>,
    },

    Unset {
	#[command(flatten)]
	target: TargetArgs,

	#[arg(value_name = "KEY", required = true)]
	keys: Vec<String>,
    },
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
	Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
	_ => Err(format!("expected KEY=VALUE, got `{}`", raw)),
    }
}

impl TargetArgs {

    /*
     * Everything fatal (missing file, schema, interpolation) fails here,
     * before the cluster is ever contacted.
     */
    fn load(&self, host: &HostEnv) -> Result<(RegistryModel, Target)> {
	let scope = Scope{
	    host: host.clone(),
	    args: self.args.iter().cloned().collect(),
	    pass_host_env: self.pass_env,
	};
	let registry = RegistryModel::from_path(&self.manifest, &scope)?;

	let target = Target{
	    namespace: self.namespace.clone().unwrap_or_else(|| registry.name.clone()),
	    apps: self.apps.clone(),
	    mode: if self.yes { Mode::Commit } else { Mode::Preview },
	    secret_namespace: self.secret_namespace.clone(),
	};
	Ok((registry, target))
    }
}

async fn connect() -> Result<KubeCluster> {
    let kube_client = KubeClient::try_default().await?;
    Ok(KubeCluster::new(kube_client))
}

async fn run(cli: Cli, host: HostEnv) -> Result<bool> {
    match cli.command {
	Command::Create(args) => {
	    let (registry, target) = args.load(&host)?;
	    log::info!("Creating apps of {} in namespace {}", registry.name, target.namespace);
	    commands::sync(&connect().await?, &registry, &target, false, true).await
	},
	Command::Sync{ target: args, prune } => {
	    let (registry, target) = args.load(&host)?;
	    log::info!("Syncing {} into namespace {}", registry.name, target.namespace);
	    commands::sync(&connect().await?, &registry, &target, prune, false).await
	},
	Command::Config(ConfigCommand::Get(args)) => {
	    let (registry, target) = args.load(&host)?;
	    commands::config_get(&connect().await?, &registry, &target).await
	},
	Command::Config(ConfigCommand::Set{ target: args, pairs }) => {
	    let (registry, target) = args.load(&host)?;
	    commands::config_edit(&connect().await?, &registry, &target, &ConfigEdit::Set(pairs)).await
	},
	Command::Config(ConfigCommand::Unset{ target: args, keys }) => {
	    let (registry, target) = args.load(&host)?;
	    commands::config_edit(&connect().await?, &registry, &target, &ConfigEdit::Unset(keys)).await
	},
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    let host = HostEnv::capture();

    match run(cli, host).await {
	Ok(true) => ExitCode::SUCCESS,
	Ok(false) => {
	    log::warn!("Some apps could not be reconciled");
	    ExitCode::FAILURE
	},
	Err(err) => {
	    if err.is_fatal() {
		log::error!("Aborting before any change was made");
	    }
	    eprintln!("error: {}", err);
	    ExitCode::FAILURE
	}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
	Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_flags() {
	let cli = Cli::parse_from([
	    "konvoy", "apply", "prod.json", "--app", "web-*", "--yes", "--prune", "--arg", "TAG=v2",
	]);

	match cli.command {
	    Command::Sync{ target, prune } => {
		assert!(prune);
		assert!(target.yes);
		assert_eq!(target.apps, vec!["web-*".to_string()]);
		assert_eq!(target.args, vec![("TAG".to_string(), "v2".to_string())]);
		assert_eq!(target.manifest, PathBuf::from("prod.json"));
	    },
	    other => panic!("expected sync, got {:?}", other),
	}
    }

    #[test]
    fn test_parse_pair() {
	assert_eq!(parse_pair("A=b=c"), Ok(("A".to_string(), "b=c".to_string())));
	assert!(parse_pair("novalue").is_err());
	assert!(parse_pair("=x").is_err());
    }

    #[test]
    fn test_load_fails_before_cluster_access() {
	let dir = tempfile::TempDir::new().unwrap();
	let manifest = dir.path().join("shop.json");
	std::fs::write(&manifest, r#"{"name": "shop", "services": [{"name": "web", "env": {"DB": "${UNSET_VAR}"}}]}"#).unwrap();

	let args = TargetArgs{
	    manifest,
	    namespace: None,
	    apps: vec![],
	    yes: true,
	    pass_env: false,
	    args: vec![],
	    secret_namespace: "default".to_string(),
	};
	match args.load(&HostEnv::default()) {
	    Err(err) => {
		assert!(err.is_fatal());
		assert!(matches!(err, Error::Interpolation{ .. }));
	    },
	    Ok(_) => panic!("interpolation of an unset variable must fail"),
	}
    }
}
