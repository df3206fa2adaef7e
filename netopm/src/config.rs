use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/*
 * netopm command line, every option can also be set from the environment.
 */
#[derive(Parser, Debug, Clone)]
#[command(name = "netopm", version, about = "Deploys and reconciles the networking components described by the NicClusterPolicy")]
pub struct Args {

    /// Directory holding one manifest directory per state
    #[arg(long, env = "NETOP_MANIFESTS_DIR", default_value = "/manifests")]
    pub manifests_dir: PathBuf,

    /// Namespace the components are deployed in
    #[arg(long, env = "NETOP_NAMESPACE", default_value = "netop")]
    pub namespace: String,

    /// CNI binaries directory on the nodes
    #[arg(long, env = "NETOP_CNI_BIN_DIR", default_value = "/opt/cni/bin")]
    pub cni_bin_dir: String,

    /// Seconds between reconciliations once everything is ready
    #[arg(long, env = "NETOP_RECONCILE_INTERVAL", default_value_t = 300)]
    pub reconcile_interval: u64,

    /// Seconds between reconciliations while something is not ready
    #[arg(long, env = "NETOP_NOT_READY_INTERVAL", default_value_t = 5)]
    pub not_ready_interval: u64,

    /// Deadline, in seconds, of every single cluster API call
    #[arg(long, env = "NETOP_API_TIMEOUT", default_value_t = 10)]
    pub api_timeout: u64,

    /// Print the NicClusterPolicy CRD and exit
    #[arg(long)]
    pub print_crd: bool,
}

impl Args {

    pub fn api_timeout(&self) -> Duration {
	Duration::from_secs(self.api_timeout)
    }
}
