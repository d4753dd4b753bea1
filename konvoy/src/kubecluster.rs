use crate::cluster::{Cluster, ServiceRequest};
use crate::errors::{Error, Result};
use crate::resources;
use konvoy_api as api;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use k8s_openapi::api::core::v1::ConfigMap as KubeConfigMap;
use k8s_openapi::api::core::v1::Namespace as KubeNamespace;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use k8s_openapi::api::core::v1::Service as KubeService;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::Error as KubeError;
use kube::api::DeleteParams as KubeDeleteParams;
use kube::api::ListParams as KubeListParams;
use kube::api::ObjectMeta;
use kube::api::Patch as KubePatch;
use kube::api::PatchParams as KubePatchParams;
use kube::api::PostParams as KubePostParams;
use log;
use std::collections::BTreeMap;

const CONFLICT: u16 = 409;
const NOT_FOUND: u16 = 404;

fn is_status(err: &KubeError, code: u16) -> bool {
    matches!(err, KubeError::Api(response) if response.code == code)
}

/*
 * KubeCluster talks to the Kubernetes API through kube-rs.  Creating an
 * object that already exists falls back to updating it.
 */
#[derive(Clone)]
pub struct KubeCluster {
    kube_client: KubeClient,
}

impl KubeCluster {

    pub fn new(kube_client: KubeClient) -> Self {
	Self{ kube_client }
    }

    fn deployments(&self, namespace: &str) -> KubeApi<KubeDeployment> {
	KubeApi::namespaced(self.kube_client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> KubeApi<KubeService> {
	KubeApi::namespaced(self.kube_client.clone(), namespace)
    }

    fn configmaps(&self, namespace: &str) -> KubeApi<KubeConfigMap> {
	KubeApi::namespaced(self.kube_client.clone(), namespace)
    }
}

#[async_trait]
impl Cluster for KubeCluster {

    async fn get_deployments(&self, namespace: Option<&str>) -> Result<Vec<KubeDeployment>> {
	let deployments: KubeApi<KubeDeployment> = match namespace {
	    Some(namespace) => self.deployments(namespace),
	    None => KubeApi::all(self.kube_client.clone()),
	};

	Ok(deployments.list(&KubeListParams::default()).await?.items)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<KubeDeployment>> {
	Ok(self.deployments(namespace).get_opt(name).await?)
    }

    async fn create_or_update_deployment(&self, namespace: &str, app: &api::AppSpec, change_cause: &str) -> Result<()> {
	let deployments = self.deployments(namespace);
	let deployment = resources::build_deployment(namespace, app, change_cause)?;

	match deployments.create(&KubePostParams::default(), &deployment).await {
	    Ok(_) => {
		log::debug!("Created deployment {}/{}", namespace, app.name);
	    },
	    Err(err) if is_status(&err, CONFLICT) => {
		log::warn!("Deployment {}/{} already exists, updating it instead", namespace, app.name);
		let params = KubePatchParams::default();
		deployments.patch(&app.name, &params, &KubePatch::Merge(&deployment)).await?;
	    },
	    Err(err) => return Err(err.into()),
	}
	Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<KubeService>> {
	Ok(self.services(namespace).get_opt(name).await?)
    }

    async fn ensure_service(&self, namespace: &str, request: &ServiceRequest) -> Result<bool> {
	let services = self.services(namespace);
	let service = resources::build_service(namespace, request);

	if services.get_opt(&request.name).await?.is_none() {
	    match services.create(&KubePostParams::default(), &service).await {
		Ok(_) => return Ok(true),
		Err(err) if is_status(&err, CONFLICT) => {
		    log::warn!("Service {}/{} appeared concurrently, updating it", namespace, request.name);
		},
		Err(err) => return Err(err.into()),
	    }
	}

	services.patch(&request.name, &KubePatchParams::default(), &KubePatch::Merge(&service)).await?;
	Ok(false)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool> {
	match self.services(namespace).delete(name, &KubeDeleteParams::default()).await {
	    Ok(_) => Ok(true),
	    Err(err) if is_status(&err, NOT_FOUND) => Ok(false),
	    Err(err) => Err(err.into()),
	}
    }

    async fn get_config(&self, namespace: &str, name: &str) -> Result<Option<BTreeMap<String, String>>> {
	let configmap = self.configmaps(namespace).get_opt(name).await?;
	Ok(configmap.map(|configmap| configmap.data.unwrap_or_default()))
    }

    /*
     * Replaces the whole data of the config map: keys missing from
     * `config` are removed.  An existing deployment of the same name gets
     * the new config hash on its pod template and rolls.
     */
    async fn set_config(&self, namespace: &str, name: &str, config: &BTreeMap<String, String>) -> Result<()> {
	let configmaps = self.configmaps(namespace);
	let params = KubePostParams::default();

	match configmaps.get_opt(name).await? {
	    Some(mut configmap) => {
		configmap.data = Some(config.clone());
		configmaps.replace(name, &params, &configmap).await?;
	    },
	    None => {
		let configmap = resources::build_config_map(namespace, name, config);
		configmaps.create(&params, &configmap).await?;
	    }
	}

	let hash = resources::config_hash(config);
	let patch = resources::config_hash_patch(&hash);
	match self.deployments(namespace).patch(name, &KubePatchParams::default(), &KubePatch::Merge(&patch)).await {
	    Ok(_) => log::debug!("Deployment {}/{} rolled to config {}", namespace, name, hash),
	    Err(err) if is_status(&err, NOT_FOUND) => {
		log::debug!("No deployment {}/{} yet, config {} applies on create", namespace, name, hash);
	    },
	    Err(err) => return Err(err.into()),
	}
	Ok(())
    }

    async fn create_namespace(&self, name: &str, dry_run: bool) -> Result<bool> {
	let namespaces: KubeApi<KubeNamespace> = KubeApi::all(self.kube_client.clone());
	let namespace = KubeNamespace{
	    metadata: ObjectMeta{
		name: Some(name.to_string()),
		labels: Some(BTreeMap::from([
		    (String::from(resources::MANAGED_BY_LABEL), String::from(resources::MANAGED_BY)),
		])),
		..Default::default()
	    },
	    ..Default::default()
	};
	let params = KubePostParams{
	    dry_run,
	    field_manager: None,
	};

	match namespaces.create(&params, &namespace).await {
	    Ok(_) => Ok(true),
	    Err(err) if is_status(&err, CONFLICT) => Ok(false),
	    Err(err) => Err(err.into()),
	}
    }

    async fn copy_secret(&self, secret: &str, from_namespace: &str, to_namespace: &str) -> Result<bool> {
	let source: KubeApi<KubeSecret> = KubeApi::namespaced(self.kube_client.clone(), from_namespace);
	let original = match source.get_opt(secret).await? {
	    Some(original) => original,
	    None => {
		log::warn!("Secret {}/{} does not exist, nothing to copy", from_namespace, secret);
		return Ok(false);
	    }
	};

	let copy = KubeSecret{
	    metadata: ObjectMeta{
		name: Some(secret.to_string()),
		namespace: Some(to_namespace.to_string()),
		..Default::default()
	    },
	    data: original.data,
	    type_: original.type_,
	    ..Default::default()
	};

	let target: KubeApi<KubeSecret> = KubeApi::namespaced(self.kube_client.clone(), to_namespace);
	match target.create(&KubePostParams::default(), &copy).await {
	    Ok(_) => Ok(true),
	    Err(err) if is_status(&err, CONFLICT) => {
		log::debug!("Secret {}/{} already present", to_namespace, secret);
		Ok(true)
	    },
	    Err(err) => Err(Error::from(err)),
	}
    }
}
