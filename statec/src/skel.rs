use crate::client::ClusterClient;
use crate::errors::{Error, ObjectError, Result};
use crate::kind::{KindDescriptor, ObjectKey, Readiness};
use crate::render::{Renderer, TemplatingData};
use crate::state::SyncState;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Error as KubeError;
use kube::Resource;
use kube::core::DynamicObject;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/*
 * Labels stamped on every object a state creates. Together they are the
 * record of "created by state X for custom resource Y", stale objects are
 * found by listing them.
 */
pub const STATE_LABEL: &str = "statec.runfc.br/state";
pub const OWNER_LABEL: &str = "statec.runfc.br/owner";
pub const APPLIED_HASH_ANNOTATION: &str = "statec.runfc.br/applied-hash";

const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(10);

/*
 * Controller owner reference to `cr`, stamped on every object created on
 * its behalf.
 */
pub fn owner_reference<CR: Resource<DynamicType = ()>>(cr: &CR) -> Result<OwnerReference> {
    match cr.controller_owner_ref(&()) {
	Some(owner) => Ok(owner),
	None => Err(Error::InvalidObject(String::from("custom resource has no name or uid"))),
    }
}

/*
 * Drop null members from maps, recursively: a null never means anything
 * to the API server but would defeat the comparison with live objects.
 */
fn prune_nulls(value: &mut JsonValue) {
    match value {
	JsonValue::Object(map) => {
	    map.retain(|_, v| !v.is_null());
	    map.values_mut().for_each(prune_nulls);
	},
	JsonValue::Array(items) => items.iter_mut().for_each(prune_nulls),
	_ => {},
    }
}

/*
 * Whether every field of `desired` is found in `live` with the same value.
 * Lists must have the same length and match item by item, fields the API
 * server defaulted into the live object are ignored.
 */
fn is_subset(desired: &JsonValue, live: &JsonValue) -> bool {
    match (desired, live) {
	(JsonValue::Object(desired), JsonValue::Object(live)) => desired
	    .iter()
	    .all(|(key, value)| value.is_null() || live.get(key).map(|l| is_subset(value, l)).unwrap_or(false)),
	(JsonValue::Array(desired), JsonValue::Array(live)) => {
	    desired.len() == live.len() && desired.iter().zip(live).all(|(d, l)| is_subset(d, l))
	},
	(desired, live) => desired == live,
    }
}

/*
 * sha256 of the object as it is applied, kept in APPLIED_HASH_ANNOTATION.
 * A field removed from the manifests changes it even though the live
 * object still holds that field.
 */
fn applied_hash(obj: &DynamicObject) -> Result<String> {
    let text = serde_json::to_string(obj).map_err(|err| Error::InvalidObject(err.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/*
 * The live object needs no write: same applied hash and every desired
 * field already in place.
 */
fn up_to_date(live: &DynamicObject, desired: &DynamicObject) -> Result<bool> {
    let hash = |obj: &DynamicObject| obj.metadata.annotations
	.as_ref()
	.and_then(|annotations| annotations.get(APPLIED_HASH_ANNOTATION).cloned());
    if hash(live).is_none() || hash(live) != hash(desired) {
	return Ok(false);
    }

    let live = serde_json::to_value(live).map_err(|err| Error::InvalidObject(err.to_string()))?;
    let desired = serde_json::to_value(desired).map_err(|err| Error::InvalidObject(err.to_string()))?;
    Ok(is_subset(&desired, &live))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct StaleOutcome {
    /* tracked objects not in the desired set */
    found: usize,

    /* of those, still present after the delete call */
    pending: usize,
}

/*
 * StateSkel is the convergence machinery every state is built on: render,
 * create or update, remove stale objects and evaluate readiness. It keeps
 * nothing between calls, everything is re-read from the cluster.
 */
#[derive(Clone)]
pub struct StateSkel {
    name: String,
    description: String,
    renderer: Renderer,
    client: Arc<dyn ClusterClient>,
    api_timeout: Duration,
    stale_kinds: Vec<KindDescriptor>,
}

impl StateSkel {

    pub fn new(name: &str, description: &str, client: Arc<dyn ClusterClient>, renderer: Renderer) -> Self {
	Self{
	    name: name.to_string(),
	    description: description.to_string(),
	    renderer: renderer,
	    client: client,
	    api_timeout: DEFAULT_API_TIMEOUT,
	    stale_kinds: KindDescriptor::common(),
	}
    }

    /*
     * Deadline of every single cluster API call
     */
    pub fn with_api_timeout(mut self, timeout: Duration) -> Self {
	self.api_timeout = timeout;
	self
    }

    /*
     * Scan `kinds` for stale objects too, on top of KindDescriptor::common().
     * A state rendering objects of other kinds must register them here, or
     * they are left behind once dropped from its manifests.
     */
    pub fn with_stale_kinds(mut self, kinds: &[KindDescriptor]) -> Self {
	for kind in kinds {
	    if !self.stale_kinds.iter().any(|k| k.same_kind(kind)) {
		self.stale_kinds.push(kind.clone());
	    }
	}
	self
    }

    pub fn name(&self) -> &str {
	&self.name
    }

    pub fn description(&self) -> &str {
	&self.description
    }

    pub fn render(&self, data: &TemplatingData) -> Result<Vec<DynamicObject>> {
	Ok(self.renderer.render_objects(data)?)
    }

    async fn call<T, F>(&self, fut: F) -> Result<T>
    where
	F: Future<Output = Result<T, KubeError>>,
    {
	match tokio::time::timeout(self.api_timeout, fut).await {
	    Ok(res) => Ok(res?),
	    Err(_) => Err(Error::Timeout(self.api_timeout)),
	}
    }

    fn tracking_selector(&self, owner_name: &str) -> String {
	format!("{}={},{}={}", STATE_LABEL, self.name, OWNER_LABEL, owner_name)
    }

    fn stamp(&self, owner: &OwnerReference, obj: &DynamicObject) -> Result<DynamicObject> {
	let mut value = serde_json::to_value(obj).map_err(|err| Error::InvalidObject(err.to_string()))?;
	prune_nulls(&mut value);
	let mut stamped: DynamicObject = serde_json::from_value(value).map_err(|err| Error::InvalidObject(err.to_string()))?;

	let labels = stamped.metadata.labels.get_or_insert_with(Default::default);
	labels.insert(STATE_LABEL.to_string(), self.name.clone());
	labels.insert(OWNER_LABEL.to_string(), owner.name.clone());
	stamped.metadata.owner_references = Some(vec![owner.clone()]);

	let hash = applied_hash(&stamped)?;
	stamped.metadata.annotations
	    .get_or_insert_with(Default::default)
	    .insert(APPLIED_HASH_ANNOTATION.to_string(), hash);
	Ok(stamped)
    }

    /*
     * Apply every object that does not exist or differs from its desired
     * form, leave the others untouched. One object failing does not stop
     * the others, failures are reported together once the batch is done.
     */
    pub async fn create_or_update_objs(&self, owner: &OwnerReference, objs: &[DynamicObject]) -> Result<()> {
	let mut keys: Vec<ObjectKey> = vec![];
	for obj in objs {
	    keys.push(ObjectKey::of(obj)?);
	}

	let mut errors: Vec<ObjectError> = vec![];
	for (obj, key) in objs.iter().zip(keys) {
	    if let Err(err) = self.create_or_update_obj(owner, obj, &key).await {
		log::error!("State {}: unable to create/update {}, got error: {}", self.name, key, err);
		errors.push(ObjectError{ key: key, source: Box::new(err) });
	    }
	}

	if errors.is_empty() {
	    Ok(())
	} else {
	    Err(Error::Objects(errors))
	}
    }

    async fn create_or_update_obj(&self, owner: &OwnerReference, obj: &DynamicObject, key: &ObjectKey) -> Result<()> {
	let kind = KindDescriptor::of(obj)?;
	let desired = self.stamp(owner, obj)?;

	match self.call(self.client.get(&kind, key.namespace.as_deref(), &key.name)).await? {
	    None => {
		log::info!("State {}: creating {}", self.name, key);
	    },
	    Some(live) if up_to_date(&live, &desired)? => {
		log::debug!("State {}: {} is up to date", self.name, key);
		return Ok(());
	    },
	    Some(_) => {
		log::info!("State {}: updating {}", self.name, key);
	    },
	}

	self.call(self.client.apply(&kind, &desired)).await?;
	Ok(())
    }

    async fn delete_stale(&self, owner_name: &str, desired: &[DynamicObject]) -> Result<StaleOutcome> {
	let mut desired_keys: BTreeSet<ObjectKey> = BTreeSet::new();
	let mut kinds = self.stale_kinds.clone();
	for obj in desired {
	    desired_keys.insert(ObjectKey::of(obj)?);

	    let kind = KindDescriptor::of(obj)?;
	    if !kinds.iter().any(|k| k.same_kind(&kind)) {
		kinds.push(kind);
	    }
	}

	let selector = self.tracking_selector(owner_name);
	let mut outcome = StaleOutcome::default();
	for kind in &kinds {
	    for tracked in self.call(self.client.list(kind, &selector)).await? {
		/* listed items do not always carry apiVersion/kind */
		let name = tracked.metadata.name.clone().unwrap_or_default();
		let namespace = tracked.metadata.namespace.as_deref();
		let key = ObjectKey::new(&kind.group, &kind.kind, namespace, &name);
		if desired_keys.contains(&key) {
		    continue;
		}

		outcome.found += 1;
		log::info!("State {}: deleting stale object {}", self.name, key);
		if self.call(self.client.delete(kind, namespace, &name)).await? {
		    log::debug!("State {}: {} is still being deleted", self.name, key);
		    outcome.pending += 1;
		}
	    }
	}

	Ok(outcome)
    }

    /*
     * Delete every object this state created for `owner_name` which is not
     * part of `desired`. Returns true while some deletion is still pending.
     */
    pub async fn handle_stale_state_objects(&self, owner_name: &str, desired: &[DynamicObject]) -> Result<bool> {
	let outcome = self.delete_stale(owner_name, desired).await?;
	Ok(outcome.pending > 0)
    }

    /*
     * The state is disabled: remove everything it created. NotReady as long
     * as something was found, Ready once nothing is left.
     */
    pub async fn handle_state_objects_deletion(&self, owner_name: &str) -> Result<SyncState> {
	let outcome = self.delete_stale(owner_name, &[]).await?;
	if outcome.found > 0 {
	    log::info!("State {}: removed {} object(s), {} still pending", self.name, outcome.found, outcome.pending);
	    return Ok(SyncState::NotReady);
	}

	Ok(SyncState::Ready)
    }

    /*
     * Ready when every object exists and its kind reports it converged.
     */
    pub async fn get_sync_state(&self, objs: &[DynamicObject]) -> Result<SyncState> {
	for obj in objs {
	    let kind = KindDescriptor::of(obj)?;
	    let key = ObjectKey::of(obj)?;
	    let status_read = |reason: String| Error::StatusRead{ key: key.clone(), reason: reason };

	    let mut live = match self.call(self.client.get(&kind, key.namespace.as_deref(), &key.name)).await {
		Ok(Some(live)) => live,
		Ok(None) => return Err(status_read(String::from("object vanished"))),
		/* timeouts, throttling, ...: the next pass reads it again */
		Err(err) if err.is_transient() => return Err(err),
		Err(err) => return Err(status_read(err.to_string())),
	    };
	    if live.types.is_none() {
		live.types = obj.types.clone();
	    }

	    let ready = Readiness::for_kind(&kind)
		.is_ready(&live)
		.map_err(|err| status_read(err.to_string()))?;
	    if !ready {
		log::debug!("State {}: {} is not ready yet", self.name, key);
		return Ok(SyncState::NotReady);
	    }
	}

	Ok(SyncState::Ready)
    }

    /*
     * One full convergence step over the desired set `objs`:
     *
     *  1. create or update every object
     *  2. delete stale objects, NotReady while any deletion is pending
     *  3. evaluate readiness of the desired objects
     */
    pub async fn converge(&self, owner: &OwnerReference, objs: &[DynamicObject]) -> Result<SyncState> {
	if objs.is_empty() {
	    self.handle_stale_state_objects(&owner.name, objs).await?;
	    return Ok(SyncState::NotReady);
	}

	self.create_or_update_objs(owner, objs).await?;

	if self.handle_stale_state_objects(&owner.name, objs).await? {
	    log::info!("State {}: waiting for stale objects removal", self.name);
	    return Ok(SyncState::NotReady);
	}

	self.get_sync_state(objs).await
    }
}
