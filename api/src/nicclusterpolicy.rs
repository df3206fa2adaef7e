use k8s_openapi::api::core::v1::NodeAffinity;
use k8s_openapi::api::core::v1::Toleration;
use kube::api::ObjectMeta;
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/*
 * The only NicClusterPolicy name the operator acts upon, any other
 * instance is reported as ignored.
 */
pub const NIC_CLUSTER_POLICY_NAME: &str = "nic-cluster-policy";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PolicyState {
    /*
     * Every enabled component is deployed and reports itself converged
     */
    READY,

    /*
     * Some component is still rolling out, or stale objects are still
     * being removed
     */
    NOT_READY,

    /*
     * A component failed to sync, see the applied state message
     */
    ERROR,

    /*
     * The policy is not the one the operator manages
     */
    IGNORE,
}

impl ToString for PolicyState {
    fn to_string(&self) -> String {
	match self {
	    PolicyState::READY => String::from("ready"),
	    PolicyState::NOT_READY => String::from("notReady"),
	    PolicyState::ERROR => String::from("error"),
	    PolicyState::IGNORE => String::from("ignore"),
	}
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {

    /* image name, e.g: multus-cni */
    pub image: String,

    /* registry / repository the image is pulled from */
    pub repository: String,

    /* image tag */
    pub version: String,

    /* names of the secrets used to pull the image */
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
}

impl ImageSpec {

    /*
     * Returns the full image path: <repository>/<image>:<version>
     */
    pub fn image_path(&self) -> String {
	format!("{}/{}:{}", self.repository, self.image, self.version)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultusSpec {

    #[serde(flatten)]
    pub image_spec: ImageSpec,

    /*
     * Optional multus configuration (JSON), when absent multus generates its
     * own from the primary network plugin
     */
    pub config: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryNetworkSpec {

    /* containernetworking plugins (macvlan, host-device, ...) */
    pub cni_plugins: Option<ImageSpec>,

    /* multus meta plugin */
    pub multus: Option<MultusSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DevicePluginSpec {

    #[serde(flatten)]
    pub image_spec: ImageSpec,

    /* device plugin configuration (JSON), mounted from a ConfigMap */
    pub config: Option<String>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(group = "netop.runfc.br", version = "v1alpha", kind = "NicClusterPolicy")]
#[kube(status = "NicClusterPolicyStatus", shortname = "ncp")]
#[serde(rename_all = "camelCase")]
pub struct NicClusterPolicySpec {

    /* tolerations applied to every component's workload */
    pub tolerations: Option<Vec<Toleration>>,

    /* node affinity applied to every component's workload */
    pub node_affinity: Option<NodeAffinity>,

    pub secondary_network: Option<SecondaryNetworkSpec>,

    pub rdma_shared_device_plugin: Option<DevicePluginSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppliedState {

    /* the component state name, e.g: state-multus-cni */
    pub name: String,

    /* ready, notReady or error */
    pub state: String,

    /* error detail when state is error or notReady because of a failure */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NicClusterPolicyStatus {

    /* the aggregated state of all components */
    pub state: String,

    /* why the policy is not ready, if we know */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /* one entry per component, in sync order */
    #[serde(default)]
    pub applied_states: Vec<AppliedState>,
}

impl NicClusterPolicyStatus {

    pub fn from(state: PolicyState, reason: Option<String>, applied_states: Vec<AppliedState>) -> NicClusterPolicyStatus {
	NicClusterPolicyStatus{
	    state: state.to_string(),
	    reason: reason,
	    applied_states: applied_states,
	}
    }
}

impl NicClusterPolicy {

    /*
     * Whether this is the policy instance the operator manages
     */
    pub fn is_managed(&self) -> bool {
	self.metadata.name.as_deref() == Some(NIC_CLUSTER_POLICY_NAME)
    }
}

pub fn new(name: &str, spec: NicClusterPolicySpec) -> NicClusterPolicy {
    let mut metadata = ObjectMeta::default();
    metadata.name = Some(name.to_string());

    NicClusterPolicy{
	metadata: metadata,
	spec: spec,
	status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_policy_with_flattened_image_spec() {
	let policy: NicClusterPolicy = serde_json::from_value(serde_json::json!({
	    "apiVersion": "netop.runfc.br/v1alpha",
	    "kind": "NicClusterPolicy",
	    "metadata": { "name": "nic-cluster-policy" },
	    "spec": {
		"secondaryNetwork": {
		    "multus": {
			"image": "multus-cni",
			"repository": "ghcr.io/k8snetworkplumbingwg",
			"version": "v3.9.3",
		    },
		},
		"rdmaSharedDevicePlugin": {
		    "image": "k8s-rdma-shared-dev-plugin",
		    "repository": "ghcr.io/mellanox",
		    "version": "v1.4.0",
		    "imagePullSecrets": ["regcred"],
		    "config": "{}",
		},
	    },
	})).unwrap();

	assert!(policy.is_managed());
	let multus = policy.spec.secondary_network.unwrap().multus.unwrap();
	assert_eq!(multus.image_spec.image_path(), "ghcr.io/k8snetworkplumbingwg/multus-cni:v3.9.3");
	assert_eq!(multus.config, None);

	let rdma = policy.spec.rdma_shared_device_plugin.unwrap();
	assert_eq!(rdma.image_spec.image_pull_secrets, vec!["regcred".to_string()]);
	assert_eq!(rdma.config.as_deref(), Some("{}"));
    }

    #[test]
    fn other_names_are_not_managed() {
	let policy = new("some-other-policy", NicClusterPolicySpec::default());
	assert!(!policy.is_managed());
    }

    #[test]
    fn status_carries_state_strings() {
	let status = NicClusterPolicyStatus::from(PolicyState::NOT_READY, None, vec![]);
	assert_eq!(status.state, "notReady");
	assert_eq!(PolicyState::IGNORE.to_string(), "ignore");
    }
}
