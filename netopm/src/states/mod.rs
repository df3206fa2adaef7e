/*
 * The networking components the operator deploys, one State each. They
 * are synced in the order new_manager() lists them.
 */
pub mod cni_plugins;
pub mod multus;
pub mod rdma_shared_dp;

#[cfg(test)]
mod testutil;

use netop_api as api;

use kube::ResourceExt;
use serde::Serialize;
use statec::ClusterClient;
use statec::KindDescriptor;
use statec::Manager;
use statec::Renderer;
use statec::StateSkel;
use statec::SyncState;
use statec::TemplatingData;
use statec::render::{MANIFEST_FILE_SUFFIX, files_with_suffix};
use statec::skel::owner_reference;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/*
 * Deployment wide settings every state binds into its manifests
 */
#[derive(Clone, Debug, Serialize)]
pub struct RuntimeSpec {
    pub namespace: String,
}

/*
 * RuntimeSpec of states installing CNI binaries on the nodes
 */
#[derive(Clone, Debug, Serialize)]
pub struct CniRuntimeSpec {
    pub namespace: String,
    pub cni_bin_directory: String,
}

/*
 * Build the skeleton of state `name`, its manifests are every template
 * under `manifest_dir`. `kinds` are the kinds those manifests create, they
 * are scanned for stale objects along with the common ones.
 */
fn new_skel(name: &str, description: &str, client: Arc<dyn ClusterClient>, manifest_dir: &Path, kinds: &[KindDescriptor], api_timeout: Duration) -> Result<StateSkel, statec::Error> {
    let files = files_with_suffix(manifest_dir, &MANIFEST_FILE_SUFFIX)?;
    log::debug!("State {} manifests: {:?}", name, files);

    let skel = StateSkel::new(name, description, client, Renderer::new(files))
	.with_stale_kinds(kinds)
	.with_api_timeout(api_timeout);
    Ok(skel)
}

/*
 * Render the state manifests with `data` and converge the cluster to them.
 */
async fn render_and_converge(skel: &StateSkel, policy: &api::NicClusterPolicy, data: &TemplatingData) -> Result<SyncState, statec::Error> {
    let owner = owner_reference(policy)?;

    log::debug!("State {}: rendering objects with data: {:?}", skel.name(), data.data);
    let objs = skel.render(data)?;
    log::debug!("State {}: rendered {} object(s)", skel.name(), objs.len());

    skel.converge(&owner, &objs).await
}

/*
 * The component is not wanted (anymore): either this state was never
 * enabled or the policy got updated and the objects must go.
 */
async fn remove_state_objects(skel: &StateSkel, policy: &api::NicClusterPolicy) -> Result<SyncState, statec::Error> {
    log::debug!("State {} is disabled, removing its objects", skel.name());
    skel.handle_state_objects_deletion(&policy.name_any()).await
}

/*
 * All the states of the operator, in sync order: multus first so the
 * plugins it delegates to come right after, then device plugins.
 */
pub fn new_manager(client: Arc<dyn ClusterClient>, manifests_dir: &Path, runtime: RuntimeSpec, api_timeout: Duration) -> Result<Manager<api::NicClusterPolicy>, statec::Error> {
    let multus = multus::StateMultusCni::new(
	client.clone(), &manifests_dir.join("state-multus-cni"), runtime.clone(), api_timeout)?;
    let cni_plugins = cni_plugins::StateCniPlugins::new(
	client.clone(), &manifests_dir.join("state-container-networking-plugins"), runtime.clone(), api_timeout)?;
    let rdma_shared_dp = rdma_shared_dp::StateRdmaSharedDp::new(
	client.clone(), &manifests_dir.join("state-rdma-shared-device-plugin"), runtime.clone(), api_timeout)?;

    Ok(Manager::new(vec![
	Box::new(multus),
	Box::new(cni_plugins),
	Box::new(rdma_shared_dp),
    ]))
}
