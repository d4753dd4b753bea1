use crate::errors::Result;
use crate::resources;
use konvoy_api as api;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use k8s_openapi::api::core::v1::Service as KubeService;
use log;
use std::collections::BTreeMap;

/*
 * What a routable app asks its Service to look like.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRequest {
    pub name: String,
    pub port: i32,
    pub domains: Vec<String>,
}

/*
 * Everything konvoy needs from a cluster.  Every call is a suspension
 * point; the reconciler itself never talks to the cluster.
 */
#[async_trait]
pub trait Cluster: Send + Sync {

    async fn get_deployments(&self, namespace: Option<&str>) -> Result<Vec<KubeDeployment>>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<KubeDeployment>>;

    /* creates the deployment, or updates it when it already exists */
    async fn create_or_update_deployment(&self, namespace: &str, app: &api::AppSpec, change_cause: &str) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<KubeService>>;

    /* returns whether the service had to be created */
    async fn ensure_service(&self, namespace: &str, service: &ServiceRequest) -> Result<bool>;

    /* returns whether there was a service to remove */
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool>;

    async fn get_config(&self, namespace: &str, name: &str) -> Result<Option<BTreeMap<String, String>>>;

    async fn set_config(&self, namespace: &str, name: &str, config: &BTreeMap<String, String>) -> Result<()>;

    /* returns whether the namespace had to be created */
    async fn create_namespace(&self, name: &str, dry_run: bool) -> Result<bool>;

    /* returns false when the source secret does not exist */
    async fn copy_secret(&self, secret: &str, from_namespace: &str, to_namespace: &str) -> Result<bool>;
}

/*
 * Reads the live state of every app deployed in `namespace`.  One read per
 * run: the result is a snapshot, later cluster changes are not tracked.
 */
pub async fn observe(cluster: &dyn Cluster, namespace: &str) -> Result<Vec<api::ObservedApp>> {
    let mut observed = vec![];

    for deployment in cluster.get_deployments(Some(namespace)).await? {
	let name = match &deployment.metadata.name {
	    Some(name) => name.clone(),
	    None => continue,
	};

	let service = cluster.get_service(namespace, &name).await?;
	let config = cluster.get_config(namespace, &name).await?.unwrap_or_default();

	match resources::observed_app(namespace, &deployment, service.as_ref(), config) {
	    Some(app) => observed.push(app),
	    None => log::warn!("Deployment {}/{} has no container, ignoring it", namespace, name),
	}
    }

    log::debug!("Observed {} app(s) in namespace {}", observed.len(), namespace);
    Ok(observed)
}

/*
 * In-memory cluster used by the tests: keeps the objects it is given,
 * records every call and fails on demand.
 */

#[cfg(test)]
mod tests {
    use super::testing::FakeCluster;
    use super::*;

    #[tokio::test]
    async fn test_observe_reads_deployment_service_and_config() {
	let app = api::AppSpec{
	    name: "web".to_string(),
	    image: Some("ghcr.io/shop/web".to_string()),
	    image_tag: Some("v3".to_string()),
	    routable: true,
	    domains: vec!["shop.example.com".to_string()],
	    env: BTreeMap::from([("PORT".to_string(), Some("8080".to_string()))]),
	    liveness_health_check: Some("/health".to_string()),
	    resources: Some(api::Resources{ cpu: Some("250m".to_string()), mem: Some("128Mi".to_string()) }),
	    ..Default::default()
	};
	let worker = api::AppSpec{ name: "worker".to_string(), image: Some("worker".to_string()), ..Default::default() };
	let cluster = FakeCluster::default().with_app("shop", &app).with_app("shop", &worker);

	let observed = observe(&cluster, "shop").await.unwrap();
	assert_eq!(observed.len(), 2);

	let web = &observed[0];
	assert_eq!(web.name, "web");
	assert_eq!(web.namespace, "shop");
	assert_eq!((web.image.as_str(), web.image_tag.as_str()), ("ghcr.io/shop/web", "v3"));
	assert!(web.routable);
	assert_eq!(web.domains, app.domains);
	assert_eq!(web.liveness_health_check.as_deref(), Some("/health"));
	assert_eq!(web.resources, app.resources);
	assert_eq!(web.env, app.config());

	let worker = &observed[1];
	assert!(!worker.routable);
	assert_eq!(worker.image_tag, "latest");
	assert_eq!(worker.resources, None);
    }
}
