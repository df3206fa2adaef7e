use crate::errors::Error;
use crate::info::InfoCatalog;
use crate::kind::KindDescriptor;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/*
 * The outcome of one State sync.
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncState {

    /* every object of the state exists and reports itself converged */
    Ready,

    /*
     * the state is converging: rollouts in progress, stale objects still
     * being removed or a transient API failure
     */
    NotReady,

    /* the state cannot converge until something is fixed */
    Error,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	let s = match self {
	    SyncState::Ready => "ready",
	    SyncState::NotReady => "notReady",
	    SyncState::Error => "error",
	};
	f.write_str(s)
    }
}

/*
 * State is one managed sub-system: it owns a manifest set and knows how to
 * bind it from the custom resource `CR`.
 */
#[async_trait]
pub trait State<CR: Send + Sync>: Send + Sync {

    /* stable identity, used as the tracking label value */
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /*
     * Kinds of live objects this state's convergence depends on, keyed by
     * kind name. Declarative only: the hosting controller watches them.
     */
    fn watched_kinds(&self) -> BTreeMap<String, KindDescriptor>;

    /*
     * Drive the cluster one step towards the state described by `cr`. Must
     * not wait: anything still in progress is reported as NotReady.
     */
    async fn sync(&self, cr: &CR, info_catalog: &InfoCatalog) -> Result<SyncState, Error>;
}
