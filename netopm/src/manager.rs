use crate::config::Args;
use crate::errors::Error;
use netop_api as api;

use futures::StreamExt;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::ResourceExt;
use kube::api::Patch as KubePatch;
use kube::api::PatchParams as KubePatchParams;
use kube::core::DynamicObject;
use kube::runtime::WatchStreamExt;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::controller::Controller as KubeController;
use kube::runtime::reflector as kube_reflector;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher as kube_watcher;
use kube::runtime::watcher::Config as KubeWatcherConfig;
use serde_json::json;
use statec::InfoCatalog;
use statec::Manager;
use statec::Results;
use statec::SyncState;
use statec::skel::OWNER_LABEL;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/*
 * NicPolicyMgr hosts the state Manager: it reconciles the NicClusterPolicy
 * and reports the outcome in its status.
 */
#[derive(Clone)]
pub struct NicPolicyMgr {
    policy_api: KubeApi<api::NicClusterPolicy>,
    kube_client: KubeClient,
    state_manager: Arc<Manager<api::NicClusterPolicy>>,
    info_catalog: Arc<InfoCatalog>,
    reconcile_interval: Duration,
    not_ready_interval: Duration,
}

#[derive(Clone)]
pub struct NicPolicyMgrCtx {
    manager: NicPolicyMgr,
}

fn policy_state(status: SyncState) -> api::PolicyState {
    match status {
	SyncState::Ready => api::PolicyState::READY,
	SyncState::NotReady => api::PolicyState::NOT_READY,
	SyncState::Error => api::PolicyState::ERROR,
    }
}

/*
 * Translate the Manager results into the policy status: one applied state
 * per component, the reason being the first failure met.
 */
fn policy_status(results: &Results) -> api::NicClusterPolicyStatus {
    let applied_states = results.states_status
	.iter()
	.map(|result| api::AppliedState{
	    name: result.state_name.clone(),
	    state: policy_state(result.status).to_string(),
	    message: result.err_info.as_ref().map(|err| err.to_string()),
	})
	.collect();

    let reason = results.first_error().map(|result| {
	let message = result.err_info.as_ref().map(|err| err.to_string()).unwrap_or_default();
	format!("{}: {}", result.state_name, message)
    });

    api::NicClusterPolicyStatus::from(policy_state(results.status), reason, applied_states)
}

/*
 * Only the policy named NIC_CLUSTER_POLICY_NAME is acted upon
 */
fn ignored_status() -> api::NicClusterPolicyStatus {
    let reason = format!("only the {} NicClusterPolicy is managed", api::NIC_CLUSTER_POLICY_NAME);
    api::NicClusterPolicyStatus::from(api::PolicyState::IGNORE, Some(reason), vec![])
}

async fn reconcile(policy: Arc<api::NicClusterPolicy>, ctx: Arc<NicPolicyMgrCtx>) -> Result<KubeAction, Error> {
    let mgr = &ctx.manager;
    let name = policy.name_any();

    if !policy.is_managed() {
	log::warn!("Ignoring NicClusterPolicy {}, only {} is managed", name, api::NIC_CLUSTER_POLICY_NAME);
	mgr.patch_status(&policy, ignored_status()).await?;
	return Ok(KubeAction::await_change());
    }

    log::info!("Reconciling NicClusterPolicy {}", name);
    let results = mgr.state_manager.sync_state(&policy, &mgr.info_catalog).await;
    mgr.patch_status(&policy, policy_status(&results)).await?;

    if results.status == SyncState::Ready {
	log::info!("NicClusterPolicy {} is ready", name);
	return Ok(KubeAction::requeue(mgr.reconcile_interval));
    }

    log::info!("NicClusterPolicy {} is not ready, requeue in {:?}", name, mgr.not_ready_interval);
    Ok(KubeAction::requeue(mgr.not_ready_interval))
}

fn error_policy(policy: Arc<api::NicClusterPolicy>, error: &Error, _ctx: Arc<NicPolicyMgrCtx>) -> KubeAction {
    log::error!("Failed to reconcile NicClusterPolicy {}: {}", policy.name_any(), error);
    KubeAction::requeue(Duration::from_secs(60))
}

/*
 * Changes to any object a state created enqueue the policy named by its
 * owner label.
 */
fn owner_of(obj: DynamicObject) -> Option<ObjectRef<api::NicClusterPolicy>> {
    obj.labels().get(OWNER_LABEL).map(|owner| ObjectRef::new(owner))
}

impl NicPolicyMgr {

    pub fn new(kube_client: KubeClient, state_manager: Manager<api::NicClusterPolicy>, info_catalog: InfoCatalog, args: &Args) -> Self {
	Self{
	    policy_api: KubeApi::all(kube_client.clone()),
	    kube_client: kube_client,
	    state_manager: Arc::new(state_manager),
	    info_catalog: Arc::new(info_catalog),
	    reconcile_interval: Duration::from_secs(args.reconcile_interval),
	    not_ready_interval: Duration::from_secs(args.not_ready_interval),
	}
    }

    /*
     * watcher returns a Future logging every policy update.
     */
    pub fn watcher(&self) -> impl Future<Output = ()> {
	let (_reader, writer) = kube_reflector::store();

	let watcher = kube_watcher(self.policy_api.clone(), KubeWatcherConfig::default());
	kube_reflector::reflector(writer, watcher)
	    .default_backoff()
	    .applied_objects()
	    .for_each(|policy| {
		match policy {
		    Ok(policy) => log::debug!("Received an update for NicClusterPolicy {}", policy.name_any()),
		    Err(err) => log::warn!("NicClusterPolicy watch error: {}", err),
		}

		futures::future::ready(())
	    })
    }

    pub fn controller(&self) -> impl Future<Output = ()> {
	let ctx = Arc::new(NicPolicyMgrCtx{
	    manager: self.clone()
	});

	let mut controller = KubeController::new(self.policy_api.clone(), KubeWatcherConfig::default());
	for kind in self.state_manager.watched_kinds() {
	    log::info!("Watching {} objects created by the states", kind.kind);

	    let resource = kind.api_resource();
	    let objects: KubeApi<DynamicObject> = KubeApi::all_with(self.kube_client.clone(), &resource);
	    controller = controller.watches_with(objects, resource, KubeWatcherConfig::default().labels(OWNER_LABEL), owner_of);
	}

	controller
	    .run(reconcile, error_policy, ctx)
	    .for_each(|reconcile| async move {
		log::debug!("Reconcile finished");

		if let Err(err) = reconcile {
		    log::error!("Failed to reconcile with error {:?}", err);
		}
	    })
    }

    /*
     * Write `new_status` unless the policy already reports it. reason is
     * always sent so that a null clears a previous one.
     */
    pub async fn patch_status(&self, policy: &api::NicClusterPolicy, new_status: api::NicClusterPolicyStatus) -> Result<(), Error> {
	if policy.status.as_ref() == Some(&new_status) {
	    log::debug!("NicClusterPolicy {} status unchanged", policy.name_any());
	    return Ok(());
	}

	let patch = json!({
	    "status": {
		"state": new_status.state,
		"reason": new_status.reason,
		"appliedStates": new_status.applied_states,
	    }
	});
	let opts = KubePatchParams::default();
	self.policy_api.patch_status(&policy.name_any(), &opts, &KubePatch::Merge(&patch)).await?;

	Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statec::StateResult;

    fn result(name: &str, status: SyncState, err: Option<&str>) -> StateResult {
	StateResult{
	    state_name: name.to_string(),
	    status: status,
	    err_info: err.map(|msg| statec::Error::Other(msg.to_string())),
	}
    }

    #[test]
    fn ready_results_have_no_reason() {
	let results = Results{
	    status: SyncState::Ready,
	    states_status: vec![
		result("state-multus-cni", SyncState::Ready, None),
		result("state-rdma-shared-device-plugin", SyncState::Ready, None),
	    ],
	};

	let status = policy_status(&results);
	assert_eq!(status.state, "ready");
	assert_eq!(status.reason, None);
	assert_eq!(status.applied_states.len(), 2);
	assert_eq!(status.applied_states[1].name, "state-rdma-shared-device-plugin");
	assert_eq!(status.applied_states[1].state, "ready");
    }

    #[test]
    fn failed_state_is_reported_with_its_message() {
	let results = Results{
	    status: SyncState::NotReady,
	    states_status: vec![
		result("state-multus-cni", SyncState::NotReady, None),
		result("state-container-networking-plugins", SyncState::Error, Some("no cni bin dir")),
		result("state-rdma-shared-device-plugin", SyncState::Error, Some("bad config")),
	    ],
	};

	let status = policy_status(&results);
	assert_eq!(status.state, "notReady");
	assert_eq!(status.reason.as_deref(), Some("state-container-networking-plugins: `no cni bin dir`"));
	assert_eq!(status.applied_states[0].state, "notReady");
	assert_eq!(status.applied_states[0].message, None);
	assert_eq!(status.applied_states[1].state, "error");
	assert_eq!(status.applied_states[1].message.as_deref(), Some("`no cni bin dir`"));
    }

    #[test]
    fn unmanaged_policies_are_ignored() {
	let status = ignored_status();
	assert_eq!(status.state, "ignore");
	assert!(status.applied_states.is_empty());
	assert!(status.reason.unwrap().contains(api::NIC_CLUSTER_POLICY_NAME));
    }

    #[test]
    fn owner_label_maps_back_to_the_policy() {
	let obj: DynamicObject = serde_json::from_value(json!({
	    "apiVersion": "apps/v1",
	    "kind": "DaemonSet",
	    "metadata": {
		"name": "kube-multus-ds",
		"namespace": "netop",
		"labels": { OWNER_LABEL: "nic-cluster-policy" },
	    },
	})).unwrap();

	let owner = owner_of(obj).unwrap();
	assert_eq!(owner.name, "nic-cluster-policy");
	assert_eq!(owner.namespace, None);
    }

    #[test]
    fn unlabelled_objects_map_to_nothing() {
	let obj: DynamicObject = serde_json::from_value(json!({
	    "apiVersion": "v1",
	    "kind": "ConfigMap",
	    "metadata": { "name": "kube-root-ca.crt", "namespace": "netop" },
	})).unwrap();

	assert!(owner_of(obj).is_none());
    }
}
