use super::{RuntimeSpec, new_skel, remove_state_objects, render_and_converge};
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

const STATE_RDMA_SHARED_DP_NAME: &str = "state-rdma-shared-device-plugin";
const STATE_RDMA_SHARED_DP_DESCRIPTION: &str = "RDMA shared device plugin deployed in the cluster";

/* one shared resource over every RDMA capable netdev */
const DEFAULT_DEVICE_PLUGIN_CONFIG: &str = r#"{"periodicUpdateInterval":300,"configList":[{"resourceName":"rdma_shared_device_a","rdmaHcaMax":63,"selectors":{"ifNames":[]}}]}"#;

pub struct StateRdmaSharedDp {
    skel: StateSkel,
    runtime: RuntimeSpec,
}

#[derive(Debug, Serialize)]
struct RdmaSharedDpManifestRenderData<'a> {
    cr_spec: &'a api::DevicePluginSpec,
    image: String,
    config: &'a str,
    tolerations: &'a Option<Vec<Toleration>>,
    node_affinity: &'a Option<NodeAffinity>,
    runtime_spec: &'a RuntimeSpec,
}

impl StateRdmaSharedDp {

    pub fn new(client: Arc<dyn ClusterClient>, manifest_dir: &Path, runtime: RuntimeSpec, api_timeout: Duration) -> Result<Self, statec::Error> {
	let skel = new_skel(STATE_RDMA_SHARED_DP_NAME, STATE_RDMA_SHARED_DP_DESCRIPTION, client, manifest_dir,
	    &[KindDescriptor::config_map(), KindDescriptor::daemon_set()], api_timeout)?;
	Ok(Self{
	    skel: skel,
	    runtime: runtime,
	})
    }
}

#[async_trait]
impl State<api::NicClusterPolicy> for StateRdmaSharedDp {

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

    async fn sync(&self, policy: &api::NicClusterPolicy, _info_catalog: &InfoCatalog) -> Result<SyncState, statec::Error> {
	log::info!("Sync custom resource {} for state {}", policy.name_any(), self.name());

	let cr_spec = match policy.spec.rdma_shared_device_plugin.as_ref() {
	    Some(cr_spec) => cr_spec,
	    None => return remove_state_objects(&self.skel, policy).await,
	};

	let data = RdmaSharedDpManifestRenderData{
	    cr_spec: cr_spec,
	    image: cr_spec.image_spec.image_path(),
	    config: cr_spec.config.as_deref().unwrap_or(DEFAULT_DEVICE_PLUGIN_CONFIG),
	    tolerations: &policy.spec.tolerations,
	    node_affinity: &policy.spec.node_affinity,
	    runtime_spec: &self.runtime,
	};
	render_and_converge(&self.skel, policy, &TemplatingData::new(&data)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::testutil::*;
    use k8s_openapi::api::core::v1::{NodeSelector, NodeSelectorRequirement, NodeSelectorTerm};
    use statec::testing::FakeCluster;

    fn state(cluster: &Arc<FakeCluster>) -> StateRdmaSharedDp {
	let dir = manifests_dir().join("state-rdma-shared-device-plugin");
	StateRdmaSharedDp::new(cluster.clone(), &dir, runtime(), Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn config_from_the_policy_lands_in_the_configmap() {
	let cluster = Arc::new(FakeCluster::new());
	let s = state(&cluster);

	assert_eq!(s.sync(&full_policy(), &InfoCatalog::new()).await.unwrap(), SyncState::NotReady);

	let cm = cluster.object(&KindDescriptor::config_map(), Some(NAMESPACE), "rdma-devices").unwrap();
	assert_eq!(cm.data["data"]["config.json"], r#"{"configList":[]}"#);

	cluster.complete_rollout(Some(NAMESPACE), "rdma-shared-dp-ds");
	assert_eq!(s.sync(&full_policy(), &InfoCatalog::new()).await.unwrap(), SyncState::Ready);
    }

    #[tokio::test]
    async fn default_config_when_none_given() {
	let cluster = Arc::new(FakeCluster::new());
	let mut policy = full_policy();
	policy.spec.rdma_shared_device_plugin.as_mut().unwrap().config = None;

	state(&cluster).sync(&policy, &InfoCatalog::new()).await.unwrap();

	let cm = cluster.object(&KindDescriptor::config_map(), Some(NAMESPACE), "rdma-devices").unwrap();
	assert_eq!(cm.data["data"]["config.json"], DEFAULT_DEVICE_PLUGIN_CONFIG);
    }

    #[tokio::test]
    async fn node_affinity_is_applied() {
	let cluster = Arc::new(FakeCluster::new());
	let mut policy = full_policy();
	policy.spec.node_affinity = Some(NodeAffinity{
	    required_during_scheduling_ignored_during_execution: Some(NodeSelector{
		node_selector_terms: vec![NodeSelectorTerm{
		    match_expressions: Some(vec![NodeSelectorRequirement{
			key: "feature.node.kubernetes.io/pci-15b3.present".to_string(),
			operator: "In".to_string(),
			values: Some(vec!["true".to_string()]),
		    }]),
		    ..Default::default()
		}],
	    }),
	    ..Default::default()
	});

	state(&cluster).sync(&policy, &InfoCatalog::new()).await.unwrap();

	let ds = cluster.object(&KindDescriptor::daemon_set(), Some(NAMESPACE), "rdma-shared-dp-ds").unwrap();
	let terms = &ds.data["spec"]["template"]["spec"]["affinity"]["nodeAffinity"]
	    ["requiredDuringSchedulingIgnoredDuringExecution"]["nodeSelectorTerms"];
	assert_eq!(terms[0]["matchExpressions"][0]["key"], "feature.node.kubernetes.io/pci-15b3.present");
    }

    #[tokio::test]
    async fn removed_from_policy_deletes_configmap_and_daemonset() {
	let cluster = Arc::new(FakeCluster::new());
	let s = state(&cluster);
	s.sync(&full_policy(), &InfoCatalog::new()).await.unwrap();
	assert_eq!(cluster.len(), 2);

	let mut policy = full_policy();
	policy.spec.rdma_shared_device_plugin = None;
	assert_eq!(s.sync(&policy, &InfoCatalog::new()).await.unwrap(), SyncState::NotReady);
	assert_eq!(cluster.len(), 0);
	assert_eq!(s.sync(&policy, &InfoCatalog::new()).await.unwrap(), SyncState::Ready);
    }
}
