use super::{CniRuntimeSpec, RuntimeSpec, new_skel, remove_state_objects, render_and_converge};
use crate::info::StaticConfig;
use netop_api as api;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::NodeAffinity;
use k8s_openapi::api::core::v1::Toleration;
use kube::ResourceExt;
use serde::Serialize;
use statec::ClusterClient;
use statec::InfoCatalog;
use statec::KindDescriptor;
use statec::State;
use statec::StateSkel;
use statec::SyncState;
use statec::TemplatingData;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const STATE_MULTUS_NAME: &str = "state-multus-cni";
const STATE_MULTUS_DESCRIPTION: &str = "Multus CNI deployed in the cluster";

/*
 * Multus meta plugin: its RBAC, an optional daemon configuration and the
 * DaemonSet installing it on every node.
 */
pub struct StateMultusCni {
    skel: StateSkel,
    runtime: RuntimeSpec,
}

#[derive(Debug, Serialize)]
struct MultusManifestRenderData<'a> {
    cr_spec: &'a api::MultusSpec,
    image: String,
    tolerations: &'a Option<Vec<Toleration>>,
    node_affinity: &'a Option<NodeAffinity>,
    runtime_spec: CniRuntimeSpec,
}

impl StateMultusCni {

    pub fn new(client: Arc<dyn ClusterClient>, manifest_dir: &Path, runtime: RuntimeSpec, api_timeout: Duration) -> Result<Self, statec::Error> {
	let skel = new_skel(STATE_MULTUS_NAME, STATE_MULTUS_DESCRIPTION, client, manifest_dir, &[
	    KindDescriptor::service_account(),
	    KindDescriptor::cluster_role(),
	    KindDescriptor::cluster_role_binding(),
	    KindDescriptor::config_map(),
	    KindDescriptor::daemon_set(),
	], api_timeout)?;
	Ok(Self{
	    skel: skel,
	    runtime: runtime,
	})
    }
}

#[async_trait]
impl State<api::NicClusterPolicy> for StateMultusCni {

    fn name(&self) -> &str {
	self.skel.name()
    }

    fn description(&self) -> &str {
	self.skel.description()
    }

    fn watched_kinds(&self) -> BTreeMap<String, KindDescriptor> {
	let mut kinds = BTreeMap::new();
	kinds.insert(String::from("DaemonSet"), KindDescriptor::daemon_set());
	kinds.insert(String::from("ConfigMap"), KindDescriptor::config_map());
	kinds
    }

    async fn sync(&self, policy: &api::NicClusterPolicy, info_catalog: &InfoCatalog) -> Result<SyncState, statec::Error> {
	log::info!("Sync custom resource {} for state {}", policy.name_any(), self.name());

	let cr_spec = match policy.spec.secondary_network.as_ref().and_then(|sn| sn.multus.as_ref()) {
	    Some(cr_spec) => cr_spec,
	    None => return remove_state_objects(&self.skel, policy).await,
	};
	let static_config = info_catalog.require::<StaticConfig>()?;

	let data = MultusManifestRenderData{
	    cr_spec: cr_spec,
	    image: cr_spec.image_spec.image_path(),
	    tolerations: &policy.spec.tolerations,
	    node_affinity: &policy.spec.node_affinity,
	    runtime_spec: CniRuntimeSpec{
		namespace: self.runtime.namespace.clone(),
		cni_bin_directory: static_config.cni_bin_directory.clone(),
	    },
	};
	render_and_converge(&self.skel, policy, &TemplatingData::new(&data)).await
    }
}
