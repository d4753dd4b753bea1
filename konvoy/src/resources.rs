/*
 * Translation between konvoy apps and the Kubernetes objects backing them:
 * a Deployment, a ConfigMap holding the env and, for routable apps, a
 * Service.  All objects are named after the app.
 */

use crate::cluster::ServiceRequest;
use crate::errors::{Error, Result};
use konvoy_api as api;

use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use k8s_openapi::api::apps::v1::DeploymentSpec as KubeDeploymentSpec;
use k8s_openapi::api::core::v1::ConfigMap as KubeConfigMap;
use k8s_openapi::api::core::v1::ConfigMapEnvSource;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::EnvFromSource;
use k8s_openapi::api::core::v1::HTTPGetAction;
use k8s_openapi::api::core::v1::LocalObjectReference;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::Probe;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::api::core::v1::Service as KubeService;
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::api::core::v1::ServiceSpec;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const APP_LABEL: &str = "app";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "konvoy";
pub const CHANGE_CAUSE_ANNOTATION: &str = "kubernetes.io/change-cause";
pub const DOMAINS_ANNOTATION: &str = "konvoy.io/domains";
pub const CONFIG_HASH_ANNOTATION: &str = "konvoy.io/config-hash";

pub fn default_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();

    labels.insert(String::from(APP_LABEL), name.to_string());
    labels.insert(String::from(MANAGED_BY_LABEL), String::from(MANAGED_BY));
    labels
}

fn metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta{
	name: Some(name.to_string()),
	namespace: Some(namespace.to_string()),
	labels: Some(default_labels(name)),
	..Default::default()
    }
}

pub fn parse_port(app: &str, port: &str) -> Result<i32> {
    port.trim().parse::<i32>()
	.map_err(|_| Error::Other(format!("app '{}' has an invalid PORT `{}`", app, port)))
}

fn limits(resources: &api::Resources) -> Option<BTreeMap<String, Quantity>> {
    let mut limits = BTreeMap::new();

    if let Some(cpu) = &resources.cpu {
	limits.insert(String::from("cpu"), Quantity(cpu.clone()));
    }
    if let Some(mem) = &resources.mem {
	limits.insert(String::from("memory"), Quantity(mem.clone()));
    }
    if limits.is_empty() { None } else { Some(limits) }
}

/*
 * The deployment for an app.  Its env comes from the app's ConfigMap; a
 * config change only touches the pod template through the config hash.
 */
pub fn build_deployment(namespace: &str, app: &api::AppSpec, change_cause: &str) -> Result<KubeDeployment> {
    let image = app.image_ref().ok_or_else(|| Error::MissingImage(app.name.clone()))?;
    let port = match app.port() {
	Some(port) => Some(parse_port(&app.name, port)?),
	None => None,
    };

    let liveness_probe = match (&app.liveness_health_check, port) {
	(None, _) => None,
	(Some(path), Some(port)) => Some(Probe{
	    http_get: Some(HTTPGetAction{
		path: Some(path.clone()),
		port: IntOrString::Int(port),
		..Default::default()
	    }),
	    ..Default::default()
	}),
	(Some(_), None) => return Err(Error::MissingPort(app.name.clone())),
    };

    let container = Container{
	name: app.name.clone(),
	image: Some(image),
	env_from: Some(vec![EnvFromSource{
	    config_map_ref: Some(ConfigMapEnvSource{
		name: app.name.clone(),
		optional: Some(true),
	    }),
	    ..Default::default()
	}]),
	ports: port.map(|port| vec![ContainerPort{ container_port: port, ..Default::default() }]),
	liveness_probe,
	resources: app.resources.as_ref().and_then(limits).map(|limits| ResourceRequirements{
	    limits: Some(limits),
	    ..Default::default()
	}),
	..Default::default()
    };

    let mut metadata = metadata(namespace, &app.name);
    metadata.annotations = Some(BTreeMap::from([
	(String::from(CHANGE_CAUSE_ANNOTATION), change_cause.to_string()),
    ]));

    Ok(KubeDeployment{
	metadata,
	spec: Some(KubeDeploymentSpec{
	    selector: LabelSelector{
		match_labels: Some(BTreeMap::from([(String::from(APP_LABEL), app.name.clone())])),
		..Default::default()
	    },
	    template: PodTemplateSpec{
		metadata: Some(ObjectMeta{
		    labels: Some(default_labels(&app.name)),
		    ..Default::default()
		}),
		spec: Some(PodSpec{
		    containers: vec![container],
		    image_pull_secrets: app.image_pull_secret.as_ref().map(|secret| vec![LocalObjectReference{
			name: secret.clone(),
		    }]),
		    ..Default::default()
		}),
	    },
	    ..Default::default()
	}),
	..Default::default()
    })
}

pub fn build_service(namespace: &str, request: &ServiceRequest) -> KubeService {
    let mut metadata = metadata(namespace, &request.name);
    metadata.annotations = Some(BTreeMap::from([
	(String::from(DOMAINS_ANNOTATION), request.domains.join(",")),
    ]));

    KubeService{
	metadata,
	spec: Some(ServiceSpec{
	    selector: Some(BTreeMap::from([(String::from(APP_LABEL), request.name.clone())])),
	    ports: Some(vec![ServicePort{
		name: Some(String::from("http")),
		port: request.port,
		target_port: Some(IntOrString::Int(request.port)),
		..Default::default()
	    }]),
	    ..Default::default()
	}),
	..Default::default()
    }
}

pub fn build_config_map(namespace: &str, name: &str, config: &BTreeMap<String, String>) -> KubeConfigMap {
    KubeConfigMap{
	metadata: metadata(namespace, name),
	data: Some(config.clone()),
	..Default::default()
    }
}

/*
 * Digest of the data written to an app's ConfigMap.
 */
pub fn config_hash(config: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();

    for (key, value) in config {
	hasher.update((key.len() as u64).to_le_bytes());
	hasher.update(key.as_bytes());
	hasher.update((value.len() as u64).to_le_bytes());
	hasher.update(value.as_bytes());
	hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/*
 * Merge patch moving the pod template onto a new config hash.  Pods read
 * their env once at start, so the rollout is what makes them see it.
 */
pub fn config_hash_patch(hash: &str) -> Value {
    json!({
	"spec": {
	    "template": {
		"metadata": {
		    "annotations": { CONFIG_HASH_ANNOTATION: hash }
		}
	    }
	}
    })
}

fn domains_of(service: &KubeService) -> Vec<String> {
    service.metadata.annotations.as_ref()
	.and_then(|annotations| annotations.get(DOMAINS_ANNOTATION))
	.map(|domains| domains.split(',').filter(|d| !d.is_empty()).map(String::from).collect())
	.unwrap_or_default()
}

/*
 * Reads an app back from its live objects.  Returns None when the
 * deployment has no container to look at.
 */
pub fn observed_app(namespace: &str,
		    deployment: &KubeDeployment,
		    service: Option<&KubeService>,
		    config: BTreeMap<String, String>) -> Option<api::ObservedApp> {
    let name = deployment.metadata.name.clone()?;
    let container = deployment.spec.as_ref()?
	.template.spec.as_ref()?
	.containers.first()?;

    let image = api::ImageRef::parse(container.image.as_deref().unwrap_or_default());
    let liveness_health_check = container.liveness_probe.as_ref()
	.and_then(|probe| probe.http_get.as_ref())
	.and_then(|http_get| http_get.path.clone());
    let resources = container.resources.as_ref()
	.and_then(|resources| resources.limits.as_ref())
	.map(|limits| api::Resources{
	    cpu: limits.get("cpu").map(|q| q.0.clone()),
	    mem: limits.get("memory").map(|q| q.0.clone()),
	});

    Some(api::ObservedApp{
	name,
	namespace: namespace.to_string(),
	image: image.image,
	image_tag: image.tag,
	env: config,
	routable: service.is_some(),
	domains: service.map(domains_of).unwrap_or_default(),
	liveness_health_check,
	resources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> api::AppSpec {
	api::AppSpec{
	    name: "web".to_string(),
	    image: Some("ghcr.io/shop/web".to_string()),
	    image_tag: Some("v1".to_string()),
	    env: BTreeMap::from([("PORT".to_string(), Some("8080".to_string()))]),
	    image_pull_secret: Some("ghcr".to_string()),
	    liveness_health_check: Some("/health".to_string()),
	    ..Default::default()
	}
    }

    #[test]
    fn test_build_deployment() {
	let deployment = build_deployment("shop", &app(), "konvoy: create web").unwrap();

	let annotations = deployment.metadata.annotations.clone().unwrap();
	assert_eq!(annotations.get(CHANGE_CAUSE_ANNOTATION).map(String::as_str), Some("konvoy: create web"));
	assert_eq!(deployment.metadata.namespace.as_deref(), Some("shop"));

	let pod = deployment.spec.unwrap().template.spec.unwrap();
	assert_eq!(pod.image_pull_secrets.unwrap()[0].name, "ghcr");

	let container = &pod.containers[0];
	assert_eq!(container.image.as_deref(), Some("ghcr.io/shop/web:v1"));
	assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
	let probe = container.liveness_probe.as_ref().unwrap().http_get.as_ref().unwrap();
	assert_eq!(probe.port, IntOrString::Int(8080));
	assert!(container.resources.is_none());
    }

    #[test]
    fn test_health_check_needs_port() {
	let mut app = app();
	app.env.clear();
	assert!(matches!(build_deployment("shop", &app, ""), Err(Error::MissingPort(_))));

	app.env.insert("PORT".to_string(), Some("http".to_string()));
	assert!(matches!(build_deployment("shop", &app, ""), Err(Error::Other(_))));
    }

    #[test]
    fn test_observed_app_round_trips_deployment() {
	let mut app = app();
	app.resources = Some(api::Resources{ cpu: None, mem: Some("1Gi".to_string()) });
	let deployment = build_deployment("shop", &app, "").unwrap();

	let observed = observed_app("shop", &deployment, None, app.config()).unwrap();
	assert_eq!(observed.image, "ghcr.io/shop/web");
	assert_eq!(observed.image_tag, "v1");
	assert!(!observed.routable);
	assert_eq!(observed.resources, app.resources);
	assert_eq!(observed.liveness_health_check.as_deref(), Some("/health"));
    }

    #[test]
    fn test_config_hash_follows_content() {
	let config = BTreeMap::from([("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]);
	let same = BTreeMap::from([("B".to_string(), "2".to_string()), ("A".to_string(), "1".to_string())]);
	let shifted = BTreeMap::from([("A".to_string(), "1B".to_string()), ("".to_string(), "2".to_string())]);

	assert_eq!(config_hash(&config), config_hash(&same));
	assert_ne!(config_hash(&config), config_hash(&shifted));
	assert_eq!(config_hash(&config).len(), 64);

	let patch = config_hash_patch("abc");
	assert_eq!(patch["spec"]["template"]["metadata"]["annotations"][CONFIG_HASH_ANNOTATION], "abc");
    }

    #[test]
    fn test_service_carries_domains() {
	let request = ServiceRequest{
	    name: "web".to_string(),
	    port: 8080,
	    domains: vec!["a.example.com".to_string(), "b.example.com".to_string()],
	};
	let service = build_service("shop", &request);

	assert_eq!(domains_of(&service), request.domains);
	assert_eq!(service.spec.unwrap().ports.unwrap()[0].port, 8080);
    }
}
