use super::RuntimeSpec;
use netop_api as api;

use serde_json::json;
use std::path::Path;
use std::path::PathBuf;

pub const NAMESPACE: &str = "netop";

pub fn manifests_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("manifests")
}

pub fn runtime() -> RuntimeSpec {
    RuntimeSpec{ namespace: NAMESPACE.to_string() }
}

/*
 * A policy enabling every component, as a user would write it
 */
pub fn full_policy() -> api::NicClusterPolicy {
    serde_json::from_value(json!({
	"apiVersion": "netop.runfc.br/v1alpha",
	"kind": "NicClusterPolicy",
	"metadata": {
	    "name": api::NIC_CLUSTER_POLICY_NAME,
	    "uid": "0b9c7c8e-5d0c-4a0c-9f5e-4f1c2d3e4a5b",
	},
	"spec": {
	    "tolerations": [{ "key": "nvidia.com/gpu", "operator": "Exists", "effect": "NoSchedule" }],
	    "secondaryNetwork": {
		"cniPlugins": {
		    "image": "plugins",
		    "repository": "ghcr.io/k8snetworkplumbingwg",
		    "version": "v1.5.0",
		},
		"multus": {
		    "image": "multus-cni",
		    "repository": "ghcr.io/k8snetworkplumbingwg",
		    "version": "v4.1.0",
		    "imagePullSecrets": ["regcred"],
		},
	    },
	    "rdmaSharedDevicePlugin": {
		"image": "k8s-rdma-shared-dev-plugin",
		"repository": "ghcr.io/mellanox",
		"version": "v1.5.1",
		"config": "{\"configList\":[]}",
	    },
	},
    })).unwrap()
}
