/*
 * netop/api - defines the NicClusterPolicy CRD, the declarative description of
 * every networking component the operator deploys in the cluster
 */

pub mod nicclusterpolicy;
pub use nicclusterpolicy::NicClusterPolicy;
pub use nicclusterpolicy::NicClusterPolicySpec;
pub use nicclusterpolicy::NicClusterPolicyStatus;
pub use nicclusterpolicy::AppliedState;
pub use nicclusterpolicy::DevicePluginSpec;
pub use nicclusterpolicy::ImageSpec;
pub use nicclusterpolicy::MultusSpec;
pub use nicclusterpolicy::PolicyState;
pub use nicclusterpolicy::SecondaryNetworkSpec;
pub use nicclusterpolicy::NIC_CLUSTER_POLICY_NAME;
