mod config;
mod errors;
mod info;
mod manager;
mod states;

use config::Args;
use info::StaticConfig;
use manager::NicPolicyMgr;
use netop_api as api;

use clap::Parser;
use kube::Client as KubeClient;
use kube::CustomResourceExt;
use statec::InfoCatalog;
use statec::KubeClusterClient;
use std::sync::Arc;

/* owner of every field netopm applies */
const FIELD_MANAGER: &str = "netopm";

/*
 * netopm workflow:
 *
 *  1. Load every state manifest directory, fail early when one is missing
 *  2. Watch the NicClusterPolicy and the objects the states created
 *  3. Sync the states in order and report the outcome in the policy status
 */
#[tokio::main]
async fn main() -> Result<(), errors::Error> {
    env_logger::init();

    let args = Args::parse();
    if args.print_crd {
	print!("{}", serde_yaml::to_string(&api::NicClusterPolicy::crd())?);
	return Ok(());
    }

    let kube_client = KubeClient::try_default().await?;
    let cluster = Arc::new(KubeClusterClient::new(kube_client.clone(), FIELD_MANAGER));
    let runtime = states::RuntimeSpec{ namespace: args.namespace.clone() };

    log::info!("starting netopm, manifests from {}", args.manifests_dir.display());
    let state_manager = states::new_manager(cluster, &args.manifests_dir, runtime, args.api_timeout())?;
    log::info!("states: {:?}", state_manager.state_names());

    let info_catalog = InfoCatalog::new().with(StaticConfig::new(&args.cni_bin_dir));
    let mgr = NicPolicyMgr::new(kube_client, state_manager, info_catalog, &args);
    tokio::select! {
	_ = mgr.watcher() => {},
	_ = mgr.controller() => {},

	// handle CTRL^C as gracefully as we can.
	_ = tokio::signal::ctrl_c() => {},
    }
    Ok(())
}
