use crate::manifest::AppSpec;
use crate::manifest::Resources;
use crate::manifest::DEFAULT_IMAGE_TAG;
use std::collections::BTreeMap;
use std::fmt;

/*
 * The config map an app should end up with.  A `None` value marks a key
 * to be removed from the live config.
 */
pub type ConfigDelta = BTreeMap<String, Option<String>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition<T> {
    pub from: T,
    pub to: T,
}

impl<T> Transition<T> {
    pub fn new(from: T, to: T) -> Self {
	Self{ from, to }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub image: String,
    pub tag: String,
}

impl ImageRef {

    pub fn new(image: &str, tag: &str) -> Self {
	Self{
	    image: image.to_string(),
	    tag: tag.to_string(),
	}
    }

    /*
     * Splits a container image reference into name and tag.  The tag
     * separator is the last ':' after the last '/', so registry ports
     * (`localhost:5000/api`) are left alone.  Digests are kept in the name.
     */
    pub fn parse(reference: &str) -> Self {
	if reference.contains('@') {
	    return Self::new(reference, "");
	}

	let name_start = reference.rfind('/').map(|idx| idx + 1).unwrap_or(0);
	match reference[name_start..].rfind(':') {
	    Some(idx) => {
		let split = name_start + idx;
		Self::new(&reference[..split], &reference[split + 1..])
	    },
	    None => Self::new(reference, DEFAULT_IMAGE_TAG),
	}
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	if self.tag.is_empty() {
	    return write!(f, "{}", self.image);
	}
	write!(f, "{}:{}", self.image, self.tag)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigChange {
    Added(String),
    Updated(String),
    Removed(String),
}

impl fmt::Display for ConfigChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	match self {
	    ConfigChange::Added(key) => write!(f, "+{}", key),
	    ConfigChange::Updated(key) => write!(f, "~{}", key),
	    ConfigChange::Removed(key) => write!(f, "-{}", key),
	}
    }
}

/*
 * Everything that has to change for one already deployed application.
 * `app` is the effective desired spec the changes are applied from.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeSet {
    pub app_name: String,
    pub app: AppSpec,

    pub config_delta: Option<ConfigDelta>,
    pub config_changes: Vec<ConfigChange>,
    pub image_change: Option<Transition<ImageRef>>,
    pub routable_change: Option<Transition<bool>>,
    pub health_check_change: Option<Transition<Option<String>>>,
    pub resources_change: Option<Transition<Option<Resources>>>,
    pub domains_change: Option<Transition<Vec<String>>>,

    pub has_change: bool,
}

fn or_none(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("none")
}

fn resources_or_none(value: &Option<Resources>) -> String {
    match value {
	Some(resources) => resources.to_string(),
	None => String::from("none"),
    }
}

impl ChangeSet {

    pub fn new(app: AppSpec) -> Self {
	Self{
	    app_name: app.name.clone(),
	    app,
	    config_delta: None,
	    config_changes: vec![],
	    image_change: None,
	    routable_change: None,
	    health_check_change: None,
	    resources_change: None,
	    domains_change: None,
	    has_change: false,
	}
    }

    /*
     * Recomputes `has_change` from the individual transitions.
     */
    pub fn seal(mut self) -> Self {
	self.has_change = self.config_delta.is_some()
	    || self.image_change.is_some()
	    || self.routable_change.is_some()
	    || self.health_check_change.is_some()
	    || self.resources_change.is_some()
	    || self.domains_change.is_some();
	self
    }

    /* Image, probe and limits all live in the deployment object */
    pub fn needs_deployment_patch(&self) -> bool {
	self.image_change.is_some() || self.health_check_change.is_some() || self.resources_change.is_some()
    }

    pub fn needs_service_change(&self) -> bool {
	self.routable_change.is_some() || self.domains_change.is_some()
    }

    /*
     * One human-readable line per transition, in a fixed order.
     */
    pub fn describe(&self) -> Vec<String> {
	let mut lines = vec![];

	if let Some(change) = &self.image_change {
	    lines.push(format!("image {} -> {}", change.from, change.to));
	}
	if self.config_delta.is_some() {
	    let keys: Vec<String> = self.config_changes.iter().map(|c| c.to_string()).collect();
	    lines.push(format!("config {}", keys.join(" ")));
	}
	if let Some(change) = &self.routable_change {
	    lines.push(format!("routable {} -> {}", change.from, change.to));
	}
	if let Some(change) = &self.domains_change {
	    lines.push(format!("domains [{}] -> [{}]", change.from.join(","), change.to.join(",")));
	}
	if let Some(change) = &self.health_check_change {
	    lines.push(format!("health check {} -> {}", or_none(&change.from), or_none(&change.to)));
	}
	if let Some(change) = &self.resources_change {
	    lines.push(format!("resources {} -> {}", resources_or_none(&change.from), resources_or_none(&change.to)));
	}
	lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_reference() {
	assert_eq!(ImageRef::parse("nginx:1.27"), ImageRef::new("nginx", "1.27"));
	assert_eq!(ImageRef::parse("nginx"), ImageRef::new("nginx", "latest"));
	assert_eq!(ImageRef::parse("localhost:5000/api"), ImageRef::new("localhost:5000/api", "latest"));
	assert_eq!(ImageRef::parse("localhost:5000/api:v2"), ImageRef::new("localhost:5000/api", "v2"));
	assert_eq!(ImageRef::parse("api@sha256:abc").to_string(), "api@sha256:abc");
    }

    #[test]
    fn test_seal_tracks_any_transition() {
	let changes = ChangeSet::new(AppSpec::default()).seal();
	assert!(!changes.has_change);

	let mut changes = ChangeSet::new(AppSpec::default());
	changes.routable_change = Some(Transition::new(true, false));
	let changes = changes.seal();
	assert!(changes.has_change);
	assert!(changes.needs_service_change());
	assert!(!changes.needs_deployment_patch());
    }

    #[test]
    fn test_describe_lists_transitions_in_order() {
	let mut changes = ChangeSet::new(AppSpec::default());
	changes.health_check_change = Some(Transition::new(None, Some("/health".to_string())));
	changes.image_change = Some(Transition::new(ImageRef::new("img", "v0"), ImageRef::new("img", "v1")));
	changes.config_delta = Some(ConfigDelta::new());
	changes.config_changes = vec![ConfigChange::Added("A".to_string()), ConfigChange::Removed("B".to_string())];

	assert_eq!(changes.describe(), vec![
	    "image img:v0 -> img:v1".to_string(),
	    "config +A -B".to_string(),
	    "health check none -> /health".to_string(),
	]);
    }
}
