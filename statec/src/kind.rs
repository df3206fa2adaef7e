use crate::errors::{Error, Result};

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::core::ApiResource;
use kube::core::DynamicObject;
use kube::core::GroupVersionKind;
use serde::de::DeserializeOwned;
use std::fmt;

/*
 * KindDescriptor names a kind of live object the engine reads, writes or
 * watches. It is enough to build an ApiResource for the dynamic API.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KindDescriptor {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespaced: bool,
}

fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
	Some((group, version)) => (group, version),
	// core group, e.g: "v1"
	None => ("", api_version),
    }
}

impl KindDescriptor {

    pub fn new(api_version: &str, kind: &str, namespaced: bool) -> Self {
	let (group, version) = split_api_version(api_version);
	Self{
	    group: group.to_string(),
	    version: version.to_string(),
	    kind: kind.to_string(),
	    namespaced: namespaced,
	}
    }

    pub fn config_map() -> Self { Self::new("v1", "ConfigMap", true) }
    pub fn secret() -> Self { Self::new("v1", "Secret", true) }
    pub fn service_account() -> Self { Self::new("v1", "ServiceAccount", true) }
    pub fn service() -> Self { Self::new("v1", "Service", true) }
    pub fn daemon_set() -> Self { Self::new("apps/v1", "DaemonSet", true) }
    pub fn deployment() -> Self { Self::new("apps/v1", "Deployment", true) }
    pub fn stateful_set() -> Self { Self::new("apps/v1", "StatefulSet", true) }
    pub fn role() -> Self { Self::new("rbac.authorization.k8s.io/v1", "Role", true) }
    pub fn role_binding() -> Self { Self::new("rbac.authorization.k8s.io/v1", "RoleBinding", true) }
    pub fn cluster_role() -> Self { Self::new("rbac.authorization.k8s.io/v1", "ClusterRole", false) }
    pub fn cluster_role_binding() -> Self { Self::new("rbac.authorization.k8s.io/v1", "ClusterRoleBinding", false) }
    pub fn network_attachment_definition() -> Self { Self::new("k8s.cni.cncf.io/v1", "NetworkAttachmentDefinition", true) }

    /*
     * The kinds every state scans for objects it created in the past. A
     * rendered object of any other kind is scanned as well while it is part
     * of the desired set, StateSkel::with_stale_kinds() adds more. Kinds the
     * cluster does not serve list as empty.
     */
    pub fn common() -> Vec<Self> {
	vec![
	    Self::config_map(),
	    Self::secret(),
	    Self::service_account(),
	    Self::service(),
	    Self::daemon_set(),
	    Self::deployment(),
	    Self::stateful_set(),
	    Self::role(),
	    Self::role_binding(),
	    Self::cluster_role(),
	    Self::cluster_role_binding(),
	    Self::network_attachment_definition(),
	]
    }

    /*
     * Describe the kind of a rendered or live object. An object carrying a
     * namespace is handled through the namespaced API.
     */
    pub fn of(obj: &DynamicObject) -> Result<Self> {
	let types = match &obj.types {
	    Some(types) => types,
	    None => {
		let errmsg = format!("object {:?} has no apiVersion/kind", obj.metadata.name);
		return Err(Error::InvalidObject(errmsg));
	    }
	};

	Ok(Self::new(&types.api_version, &types.kind, obj.metadata.namespace.is_some()))
    }

    pub fn api_version(&self) -> String {
	if self.group.is_empty() {
	    self.version.clone()
	} else {
	    format!("{}/{}", self.group, self.version)
	}
    }

    pub fn gvk(&self) -> GroupVersionKind {
	GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    pub fn api_resource(&self) -> ApiResource {
	ApiResource::from_gvk(&self.gvk())
    }

    /*
     * Two descriptors name the same kind regardless of the served version.
     */
    pub fn same_kind(&self, other: &KindDescriptor) -> bool {
	self.group == other.group && self.kind == other.kind
    }
}

/*
 * Identity of one object: used to match the desired set against live
 * objects found through the tracking labels.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {

    pub fn new(group: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
	Self{
	    group: group.to_string(),
	    kind: kind.to_string(),
	    namespace: namespace.map(|ns| ns.to_string()),
	    name: name.to_string(),
	}
    }

    pub fn of(obj: &DynamicObject) -> Result<Self> {
	let kind = KindDescriptor::of(obj)?;
	let name = match &obj.metadata.name {
	    Some(name) => name,
	    None => {
		let errmsg = format!("{} object without metadata.name", kind.kind);
		return Err(Error::InvalidObject(errmsg));
	    }
	};

	Ok(Self::new(&kind.group, &kind.kind, obj.metadata.namespace.as_deref(), name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	let kind = if self.group.is_empty() {
	    self.kind.clone()
	} else {
	    format!("{}/{}", self.group, self.kind)
	};

	match &self.namespace {
	    Some(ns) => write!(f, "{} {}/{}", kind, ns, self.name),
	    None => write!(f, "{} {}", kind, self.name),
	}
    }
}

/*
 * How to tell whether a live object of a given kind has converged.
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Readiness {
    DaemonSet,
    Deployment,
    StatefulSet,

    /* kinds without a rollout: ready as soon as they exist */
    Always,
}

fn typed<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    let value = serde_json::to_value(obj)
	.map_err(|err| Error::InvalidObject(err.to_string()))?;
    serde_json::from_value(value)
	.map_err(|err| Error::InvalidObject(err.to_string()))
}

fn generation_observed(generation: Option<i64>, observed: Option<i64>) -> bool {
    match (generation, observed) {
	(Some(generation), Some(observed)) => observed >= generation,
	(Some(_), None) => false,
	(None, _) => true,
    }
}

impl Readiness {

    pub fn for_kind(kind: &KindDescriptor) -> Self {
	match (kind.group.as_str(), kind.kind.as_str()) {
	    ("apps", "DaemonSet") => Readiness::DaemonSet,
	    ("apps", "Deployment") => Readiness::Deployment,
	    ("apps", "StatefulSet") => Readiness::StatefulSet,
	    _ => Readiness::Always,
	}
    }

    pub fn is_ready(&self, obj: &DynamicObject) -> Result<bool> {
	match self {
	    Readiness::DaemonSet => Ok(daemon_set_ready(&typed::<DaemonSet>(obj)?)),
	    Readiness::Deployment => Ok(deployment_ready(&typed::<Deployment>(obj)?)),
	    Readiness::StatefulSet => Ok(stateful_set_ready(&typed::<StatefulSet>(obj)?)),
	    Readiness::Always => Ok(true),
	}
    }
}

fn daemon_set_ready(ds: &DaemonSet) -> bool {
    let status = match &ds.status {
	Some(status) => status,
	None => return false,
    };

    /* nothing to schedule, e.g: no node matches the selector */
    if status.desired_number_scheduled == 0 {
	return true;
    }
    if !generation_observed(ds.metadata.generation, status.observed_generation) {
	return false;
    }

    let desired = status.desired_number_scheduled;
    status.number_unavailable.unwrap_or(0) == 0
	&& status.number_available.unwrap_or(0) == desired
	&& status.updated_number_scheduled.unwrap_or(0) == desired
}

fn deployment_ready(deploy: &Deployment) -> bool {
    let status = match &deploy.status {
	Some(status) => status,
	None => return false,
    };
    if !generation_observed(deploy.metadata.generation, status.observed_generation) {
	return false;
    }

    let replicas = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    status.updated_replicas.unwrap_or(0) == replicas
	&& status.available_replicas.unwrap_or(0) == replicas
	&& status.ready_replicas.unwrap_or(0) == replicas
}

fn stateful_set_ready(sts: &StatefulSet) -> bool {
    let status = match &sts.status {
	Some(status) => status,
	None => return false,
    };
    if !generation_observed(sts.metadata.generation, status.observed_generation) {
	return false;
    }

    let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    status.ready_replicas.unwrap_or(0) == replicas
	&& status.updated_replicas.unwrap_or(0) == replicas
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn daemon_set(generation: i64, status: serde_json::Value) -> DynamicObject {
	serde_json::from_value(json!({
	    "apiVersion": "apps/v1",
	    "kind": "DaemonSet",
	    "metadata": { "name": "ds", "namespace": "netop", "generation": generation },
	    "spec": {
		"selector": { "matchLabels": { "app": "ds" } },
		"template": { "metadata": { "labels": { "app": "ds" } } },
	    },
	    "status": status,
	})).unwrap()
    }

    #[test]
    fn describes_core_and_grouped_kinds() {
	let cm = KindDescriptor::config_map();
	assert_eq!(cm.api_version(), "v1");
	assert_eq!(cm.api_resource().plural, "configmaps");

	let crb = KindDescriptor::cluster_role_binding();
	assert_eq!(crb.api_version(), "rbac.authorization.k8s.io/v1");
	assert!(!crb.namespaced);
    }

    #[test]
    fn object_key_and_kind_follow_the_object() {
	let ds = daemon_set(1, json!({}));
	let kind = KindDescriptor::of(&ds).unwrap();
	assert_eq!(kind, KindDescriptor::daemon_set());

	let key = ObjectKey::of(&ds).unwrap();
	assert_eq!(key, ObjectKey::new("apps", "DaemonSet", Some("netop"), "ds"));
	assert_eq!(key.to_string(), "apps/DaemonSet netop/ds");
    }

    #[test]
    fn daemon_set_ready_once_rollout_completes() {
	let rolling = daemon_set(2, json!({
	    "currentNumberScheduled": 3,
	    "desiredNumberScheduled": 3,
	    "numberMisscheduled": 0,
	    "numberReady": 2,
	    "numberAvailable": 2,
	    "numberUnavailable": 1,
	    "updatedNumberScheduled": 3,
	    "observedGeneration": 2,
	}));
	assert!(!Readiness::DaemonSet.is_ready(&rolling).unwrap());

	let stale_generation = daemon_set(3, json!({
	    "currentNumberScheduled": 3,
	    "desiredNumberScheduled": 3,
	    "numberMisscheduled": 0,
	    "numberReady": 3,
	    "numberAvailable": 3,
	    "updatedNumberScheduled": 3,
	    "observedGeneration": 2,
	}));
	assert!(!Readiness::DaemonSet.is_ready(&stale_generation).unwrap());

	let done = daemon_set(2, json!({
	    "currentNumberScheduled": 3,
	    "desiredNumberScheduled": 3,
	    "numberMisscheduled": 0,
	    "numberReady": 3,
	    "numberAvailable": 3,
	    "updatedNumberScheduled": 3,
	    "observedGeneration": 2,
	}));
	assert!(Readiness::DaemonSet.is_ready(&done).unwrap());
    }

    #[test]
    fn daemon_set_without_status_is_not_ready() {
	let mut ds = daemon_set(1, json!({}));
	ds.data.as_object_mut().unwrap().remove("status");
	assert!(!Readiness::DaemonSet.is_ready(&ds).unwrap());
    }

    #[test]
    fn deployment_defaults_to_one_replica() {
	let deploy: DynamicObject = serde_json::from_value(json!({
	    "apiVersion": "apps/v1",
	    "kind": "Deployment",
	    "metadata": { "name": "d", "namespace": "netop", "generation": 1 },
	    "spec": {
		"selector": { "matchLabels": { "app": "d" } },
		"template": { "metadata": { "labels": { "app": "d" } } },
	    },
	    "status": {
		"observedGeneration": 1,
		"replicas": 1,
		"updatedReplicas": 1,
		"readyReplicas": 1,
		"availableReplicas": 1,
	    },
	})).unwrap();

	assert_eq!(Readiness::for_kind(&KindDescriptor::of(&deploy).unwrap()), Readiness::Deployment);
	assert!(Readiness::Deployment.is_ready(&deploy).unwrap());
    }

    #[test]
    fn other_kinds_are_ready_when_present() {
	assert_eq!(Readiness::for_kind(&KindDescriptor::config_map()), Readiness::Always);
    }
}
