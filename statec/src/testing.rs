/*
 * In-memory cluster for tests. It keeps objects keyed by identity, counts
 * writes, can hold deletions (as finalizers would) and can be told to fail
 * writes of a given object.
 *
 * Apply merges like server-side apply does for a single manager: maps key
 * by key, lists of named items by name, other lists replaced. It does not
 * track field ownership, so keys dropped from a map stay.
 */
use crate::client::ClusterClient;
use crate::kind::{KindDescriptor, ObjectKey};

use async_trait::async_trait;
use kube::Error as KubeError;
use kube::core::DynamicObject;
use kube::core::ErrorResponse;
use serde_json::Value as JsonValue;
use serde_json::json;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::MutexGuard;

pub fn api_error(code: u16, reason: &str) -> KubeError {
    KubeError::Api(ErrorResponse{
	status: "Failure".to_string(),
	message: format!("{} ({})", reason, code),
	reason: reason.to_string(),
	code: code,
    })
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    terminating: BTreeSet<ObjectKey>,
    failing_writes: BTreeMap<String, u16>,
    hold_deletions: bool,
    next_version: u64,

    creates: usize,
    updates: usize,
    deletes: usize,
}

#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<Inner>,
}

fn key_for(kind: &KindDescriptor, namespace: Option<&str>, name: &str) -> ObjectKey {
    ObjectKey::new(&kind.group, &kind.kind, namespace, name)
}

fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector
	.split(',')
	.filter(|term| !term.is_empty())
	.all(|term| match term.split_once('=') {
	    Some((key, value)) => labels.get(key).map(|v| v == value).unwrap_or(false),
	    None => labels.contains_key(term),
	})
}

impl FakeCluster {

    pub fn new() -> Self {
	Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
	match self.inner.lock() {
	    Ok(guard) => guard,
	    Err(poisoned) => poisoned.into_inner(),
	}
    }

    /*
     * Put `obj` as is in the cluster, no counters touched.
     */
    pub fn insert(&self, obj: DynamicObject) {
	let key = ObjectKey::of(&obj).expect("object needs apiVersion, kind and name");
	self.lock().objects.insert(key, obj);
    }

    pub fn object(&self, kind: &KindDescriptor, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
	self.lock().objects.get(&key_for(kind, namespace, name)).cloned()
    }

    /*
     * Replace the status of a live object, as the workload controller would.
     */
    pub fn set_status(&self, kind: &KindDescriptor, namespace: Option<&str>, name: &str, status: JsonValue) {
	let mut inner = self.lock();
	if let Some(obj) = inner.objects.get_mut(&key_for(kind, namespace, name)) {
	    obj.data["status"] = status;
	}
    }

    /*
     * Report the DaemonSet `name` as fully rolled out on two nodes, at its
     * current generation.
     */
    pub fn complete_rollout(&self, namespace: Option<&str>, name: &str) {
	let kind = KindDescriptor::daemon_set();
	let generation = self.object(&kind, namespace, name)
	    .and_then(|ds| ds.metadata.generation)
	    .unwrap_or(1);

	self.set_status(&kind, namespace, name, json!({
	    "currentNumberScheduled": 2,
	    "desiredNumberScheduled": 2,
	    "numberMisscheduled": 0,
	    "numberReady": 2,
	    "numberAvailable": 2,
	    "updatedNumberScheduled": 2,
	    "observedGeneration": generation,
	}));
    }

    /*
     * Edit a live object in place, as the API server defaulting or another
     * client would. No counter is touched.
     */
    pub fn edit<F: FnOnce(&mut DynamicObject)>(&self, kind: &KindDescriptor, namespace: Option<&str>, name: &str, edit: F) {
	let mut inner = self.lock();
	if let Some(obj) = inner.objects.get_mut(&key_for(kind, namespace, name)) {
	    edit(obj);
	}
    }

    /* writes of any object named `name` fail with `code` */
    pub fn fail_writes(&self, name: &str, code: u16) {
	self.lock().failing_writes.insert(name.to_string(), code);
    }

    /*
     * While held, deleted objects stay around until release_deletions().
     */
    pub fn hold_deletions(&self, hold: bool) {
	self.lock().hold_deletions = hold;
    }

    pub fn release_deletions(&self) {
	let mut inner = self.lock();
	inner.hold_deletions = false;
	let terminating = std::mem::take(&mut inner.terminating);
	for key in terminating {
	    inner.objects.remove(&key);
	}
    }

    pub fn len(&self) -> usize {
	self.lock().objects.len()
    }

    pub fn creates(&self) -> usize { self.lock().creates }
    pub fn updates(&self) -> usize { self.lock().updates }
    pub fn deletes(&self) -> usize { self.lock().deletes }

    pub fn reset_counters(&self) {
	let mut inner = self.lock();
	inner.creates = 0;
	inner.updates = 0;
	inner.deletes = 0;
    }
}

fn check_write(inner: &Inner, name: &str) -> Result<(), KubeError> {
    match inner.failing_writes.get(name) {
	Some(code) => Err(api_error(*code, "InjectedFailure")),
	None => Ok(()),
    }
}

fn item_name(item: &JsonValue) -> Option<&str> {
    item.get("name").and_then(|name| name.as_str())
}

fn apply_values(live: &mut JsonValue, desired: &JsonValue) {
    match (live, desired) {
	(JsonValue::Object(live), JsonValue::Object(desired)) => {
	    for (key, value) in desired {
		match live.get_mut(key) {
		    Some(current) => apply_values(current, value),
		    None => {
			live.insert(key.clone(), value.clone());
		    }
		}
	    }
	},
	(JsonValue::Array(live), JsonValue::Array(desired)) if desired.iter().all(|item| item_name(item).is_some()) => {
	    let mut merged: Vec<JsonValue> = vec![];
	    for item in desired {
		let mut current = live.iter()
		    .find(|l| item_name(l) == item_name(item))
		    .cloned()
		    .unwrap_or(JsonValue::Null);
		apply_values(&mut current, item);
		merged.push(current);
	    }
	    *live = merged;
	},
	(live, desired) => {
	    *live = desired.clone();
	}
    }
}

fn with_types(kind: &KindDescriptor, obj: &DynamicObject) -> DynamicObject {
    let mut obj = obj.clone();
    obj.types = Some(kube::core::TypeMeta{
	api_version: kind.api_version(),
	kind: kind.kind.clone(),
    });
    obj
}

#[async_trait]
impl ClusterClient for FakeCluster {

    async fn get(&self, kind: &KindDescriptor, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>, KubeError> {
	Ok(self.object(kind, namespace, name))
    }

    async fn apply(&self, kind: &KindDescriptor, obj: &DynamicObject) -> Result<DynamicObject, KubeError> {
	let name = obj.metadata.name.clone().unwrap_or_default();
	let key = key_for(kind, obj.metadata.namespace.as_deref(), &name);
	let mut inner = self.lock();
	check_write(&inner, &name)?;

	let live = match inner.objects.get(&key) {
	    Some(live) => live.clone(),
	    None => {
		inner.next_version += 1;
		let mut created = with_types(kind, obj);
		created.metadata.resource_version = Some(inner.next_version.to_string());
		created.metadata.uid = Some(format!("uid-{}", inner.next_version));
		created.metadata.generation = Some(1);

		inner.creates += 1;
		inner.objects.insert(key, created.clone());
		return Ok(created);
	    }
	};

	inner.updates += 1;
	let current = serde_json::to_value(&live).map_err(KubeError::SerdeError)?;
	let mut merged = current.clone();
	apply_values(&mut merged, &serde_json::to_value(obj).map_err(KubeError::SerdeError)?);
	if merged == current {
	    /* nothing changed: no new resourceVersion */
	    return Ok(live);
	}

	let mut applied: DynamicObject = serde_json::from_value(merged).map_err(KubeError::SerdeError)?;
	inner.next_version += 1;
	applied.metadata.resource_version = Some(inner.next_version.to_string());
	if live.data.get("spec") != applied.data.get("spec") {
	    applied.metadata.generation = Some(live.metadata.generation.unwrap_or(0) + 1);
	}

	inner.objects.insert(key, applied.clone());
	Ok(applied)
    }

    async fn delete(&self, kind: &KindDescriptor, namespace: Option<&str>, name: &str) -> Result<bool, KubeError> {
	let key = key_for(kind, namespace, name);
	let mut inner = self.lock();
	check_write(&inner, name)?;
	if !inner.objects.contains_key(&key) {
	    return Ok(false);
	}

	inner.deletes += 1;
	if inner.hold_deletions {
	    inner.terminating.insert(key);
	    return Ok(true);
	}
	inner.objects.remove(&key);
	Ok(false)
    }

    async fn list(&self, kind: &KindDescriptor, label_selector: &str) -> Result<Vec<DynamicObject>, KubeError> {
	let inner = self.lock();
	let items = inner.objects
	    .iter()
	    .filter(|(key, _)| key.group == kind.group && key.kind == kind.kind)
	    .filter(|(_, obj)| matches_selector(obj, label_selector))
	    .map(|(_, obj)| {
		/* like the API server, items come without apiVersion/kind */
		let mut item = obj.clone();
		item.types = None;
		item
	    })
	    .collect();
	Ok(items)
    }
}
