use crate::changeset::ImageRef;
use crate::manifest::Resources;
use std::collections::BTreeMap;

/*
 * An application as it currently runs in the cluster.  Built once per run
 * from the deployment, its service and its config map; never mutated.
 */
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservedApp {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub image_tag: String,
    pub env: BTreeMap<String, String>,

    /* whether a Service object exists for the app */
    pub routable: bool,
    pub domains: Vec<String>,
    pub liveness_health_check: Option<String>,
    pub resources: Option<Resources>,
}

impl ObservedApp {

    pub fn image_ref(&self) -> ImageRef {
	ImageRef::new(&self.image, &self.image_tag)
    }
}
