use konvoy_api as api;

use log;
use std::collections::BTreeMap;

/*
 * Computes the config an app should end up with, given what is live
 * (`existing`) and what the manifest asks for (`desired`):
 *
 *  - keys only in `desired` are added
 *  - keys in both with a different value take the desired value
 *  - keys in both with the same value are kept
 *  - keys only in `existing` are kept, or marked `None` when `prune` is set
 *
 * Returns `None` when nothing changes, so "no-op" is never confused with
 * an empty config.
 */
pub fn merge_config(existing: &BTreeMap<String, String>,
		    desired: &BTreeMap<String, String>,
		    prune: bool) -> Option<api::ConfigDelta> {
    let mut merged = api::ConfigDelta::new();
    let mut changed = false;

    for (key, value) in desired {
	if existing.get(key) != Some(value) {
	    changed = true;
	}
	merged.insert(key.clone(), Some(value.clone()));
    }

    for (key, value) in existing {
	if desired.contains_key(key) {
	    continue;
	}

	if prune {
	    merged.insert(key.clone(), None);
	    changed = true;
	} else {
	    log::warn!("Keeping config key {} which the manifest does not declare (prune to remove it)", key);
	    merged.insert(key.clone(), Some(value.clone()));
	}
    }

    if changed { Some(merged) } else { None }
}

/*
 * Which keys a merged config actually adds, updates or removes.
 */
pub fn config_changes(existing: &BTreeMap<String, String>, merged: &api::ConfigDelta) -> Vec<api::ConfigChange> {
    merged.iter()
	.filter_map(|(key, value)| match (existing.get(key), value) {
	    (None, Some(_)) => Some(api::ConfigChange::Added(key.clone())),
	    (Some(old), Some(new)) if old != new => Some(api::ConfigChange::Updated(key.clone())),
	    (Some(_), None) => Some(api::ConfigChange::Removed(key.clone())),
	    _ => None,
	})
	.collect()
}

/*
 * The config map to write once a delta is applied: delete markers dropped.
 */
pub fn resolved(delta: &api::ConfigDelta) -> BTreeMap<String, String> {
    delta.iter()
	.filter_map(|(key, value)| value.as_ref().map(|v| (key.clone(), v.clone())))
	.collect()
}
