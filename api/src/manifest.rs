use crate::changeset::ImageRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/*
 * Env maps keep `null` values around: a null coming from a child manifest
 * marks a key inherited from a parent for removal.
 */
pub type EnvMap = BTreeMap<String, Option<String>>;

pub const DEFAULT_IMAGE_TAG: &str = "latest";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Resources {

    pub cpu: Option<String>,

    pub mem: Option<String>,
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	let cpu = self.cpu.as_deref().unwrap_or("-");
	let mem = self.mem.as_deref().unwrap_or("-");
	write!(f, "cpu={} mem={}", cpu, mem)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppSpec {

    /* Stable identity: merge key across the extends chain and the cluster object name */
    pub name: String,

    pub repo: Option<String>,

    pub image: Option<String>,

    pub image_tag: Option<String>,

    /* When true the app is exposed through a Service on env.PORT */
    #[serde(default)]
    pub routable: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,

    pub resources: Option<Resources>,

    #[serde(default)]
    pub env: EnvMap,

    pub image_pull_secret: Option<String>,

    /* HTTP path probed on env.PORT */
    pub liveness_health_check: Option<String>,
}

impl AppSpec {

    /*
     * Name and tag of the image to run.  `image` may carry its own tag
     * (`redis:7`) or a digest (`api@sha256:...`).  A digest pins the
     * reference and `imageTag` is ignored; otherwise `imageTag` wins over
     * an embedded tag, which wins over `latest`.
     */
    pub fn image_parts(&self) -> Option<ImageRef> {
	let parsed = ImageRef::parse(self.image.as_ref()?);
	if parsed.tag.is_empty() {
	    return Some(parsed);
	}

	match self.image_tag.as_deref() {
	    Some(tag) if !tag.is_empty() => Some(ImageRef::new(&parsed.image, tag)),
	    _ => Some(parsed),
	}
    }

    /* the reference as handed to the container runtime */
    pub fn image_ref(&self) -> Option<String> {
	self.image_parts().map(|parts| parts.to_string())
    }

    /*
     * Registry host derived from the image name, e.g.
     * `ghcr.io/acme/api` -> `ghcr.io`.  Docker hub images have none.
     */
    pub fn registry(&self) -> Option<String> {
	let image = self.image.as_ref()?;
	let (first, rest) = image.split_once('/')?;

	if rest.is_empty() {
	    return None;
	}
	if first.contains('.') || first.contains(':') || first == "localhost" {
	    return Some(first.to_string());
	}
	None
    }

    pub fn port(&self) -> Option<&str> {
	match self.env.get("PORT") {
	    Some(Some(port)) => Some(port.as_str()),
	    _ => None,
	}
    }

    /*
     * The env map without its delete markers, as it ends up in the cluster.
     */
    pub fn config(&self) -> BTreeMap<String, String> {
	self.env.iter()
	    .filter_map(|(key, value)| value.as_ref().map(|v| (key.clone(), v.clone())))
	    .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {

    pub name: String,

    pub api_version: Option<String>,

    /* Path of the parent manifest, relative to this file's directory */
    pub extends: Option<String>,

    /* Defaults for the `${VAR}` placeholders */
    #[serde(default)]
    pub args: BTreeMap<String, String>,

    /* Shared env, inherited by every service */
    #[serde(default)]
    pub env: EnvMap,

    #[serde(default)]
    pub services: Vec<AppSpec>,
}
