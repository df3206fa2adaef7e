use crate::errors::Error;
use crate::info::InfoCatalog;
use crate::kind::KindDescriptor;
use crate::state::State;
use crate::state::SyncState;

use std::collections::BTreeSet;

/*
 * Result of a single State sync.
 */
#[derive(Debug)]
pub struct StateResult {
    pub state_name: String,
    pub status: SyncState,

    /* set when the sync failed, whatever the status it maps to */
    pub err_info: Option<Error>,
}

/*
 * Results of one Manager pass: one entry per state, in sync order. `status`
 * is Ready only when every state is Ready.
 */
#[derive(Debug)]
pub struct Results {
    pub status: SyncState,
    pub states_status: Vec<StateResult>,
}

impl Results {

    /*
     * The first failed state, if any
     */
    pub fn first_error(&self) -> Option<&StateResult> {
	self.states_status.iter().find(|result| result.err_info.is_some())
    }
}

/*
 * Manager runs a fixed, ordered list of states against a custom resource
 * of type `CR`. It never reorders nor stops early: a failing state is
 * recorded and the next one runs.
 */
pub struct Manager<CR: Send + Sync> {
    states: Vec<Box<dyn State<CR>>>,
}

impl<CR: Send + Sync> Manager<CR> {

    pub fn new(states: Vec<Box<dyn State<CR>>>) -> Self {
	Self{ states: states }
    }

    pub fn state_names(&self) -> Vec<&str> {
	self.states.iter().map(|state| state.name()).collect()
    }

    /*
     * Union of the kinds every state watches, by kind name. The first state
     * declaring a kind wins.
     */
    pub fn watched_kinds(&self) -> Vec<KindDescriptor> {
	let mut seen: BTreeSet<String> = BTreeSet::new();
	let mut kinds: Vec<KindDescriptor> = vec![];

	for state in &self.states {
	    for (name, kind) in state.watched_kinds() {
		if seen.insert(name) {
		    kinds.push(kind);
		}
	    }
	}

	log::debug!("Watch resources for manager: {:?}", seen);
	kinds
    }

    /*
     * Sync every state in order and aggregate their statuses.
     */
    pub async fn sync_state(&self, cr: &CR, info_catalog: &InfoCatalog) -> Results {
	log::info!("Syncing system state");
	let mut results = Results{
	    status: SyncState::NotReady,
	    states_status: vec![],
	};
	let mut states_ready = true;

	for state in &self.states {
	    log::info!("Sync State {}: {}", state.name(), state.description());

	    let result = match state.sync(cr, info_catalog).await {
		Ok(status) => StateResult{
		    state_name: state.name().to_string(),
		    status: status,
		    err_info: None,
		},
		Err(err) => {
		    let status = err.sync_state();
		    if status == SyncState::Error {
			log::warn!("Error while syncing state {}: {}", state.name(), err);
		    } else {
			log::info!("State {} is not ready: {}", state.name(), err);
		    }
		    StateResult{
			state_name: state.name().to_string(),
			status: status,
			err_info: Some(err),
		    }
		}
	    };

	    if result.status != SyncState::Ready {
		states_ready = false;
	    }
	    results.states_status.push(result);
	}

	if states_ready {
	    results.status = SyncState::Ready;
	    log::info!("Sync done for custom resource");
	} else {
	    log::info!("Sync not done for custom resource");
	}

	results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    /* stand-in custom resource */
    struct Policy {
	fail: bool,
    }

    struct FixedState {
	name: String,
	status: SyncState,
	kinds: Vec<(&'static str, KindDescriptor)>,
	calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl State<Policy> for FixedState {
	fn name(&self) -> &str {
	    &self.name
	}

	fn description(&self) -> &str {
	    "fixed outcome"
	}

	fn watched_kinds(&self) -> BTreeMap<String, KindDescriptor> {
	    self.kinds.iter().map(|(name, kind)| (name.to_string(), kind.clone())).collect()
	}

	async fn sync(&self, cr: &Policy, _info_catalog: &InfoCatalog) -> Result<SyncState, Error> {
	    self.calls.lock().unwrap().push(self.name.clone());
	    if cr.fail && self.status == SyncState::Error {
		return Err(Error::Other(format!("{} broke", self.name)));
	    }
	    Ok(self.status)
	}
    }

    fn state(name: &str, status: SyncState, calls: &Arc<Mutex<Vec<String>>>) -> Box<dyn State<Policy>> {
	Box::new(FixedState{
	    name: name.to_string(),
	    status: status,
	    kinds: vec![],
	    calls: calls.clone(),
	})
    }

    #[tokio::test]
    async fn all_ready_is_ready_in_configured_order() {
	let calls = Arc::new(Mutex::new(vec![]));
	let mgr = Manager::new(vec![
	    state("state-b", SyncState::Ready, &calls),
	    state("state-a", SyncState::Ready, &calls),
	    state("state-c", SyncState::Ready, &calls),
	]);

	let results = mgr.sync_state(&Policy{ fail: false }, &InfoCatalog::new()).await;
	assert_eq!(results.status, SyncState::Ready);
	assert_eq!(*calls.lock().unwrap(), vec!["state-b", "state-a", "state-c"]);
	assert_eq!(mgr.state_names(), vec!["state-b", "state-a", "state-c"]);
	assert!(results.first_error().is_none());
    }

    #[tokio::test]
    async fn one_not_ready_state_makes_the_aggregate_not_ready() {
	let calls = Arc::new(Mutex::new(vec![]));
	let mgr = Manager::new(vec![
	    state("state-a", SyncState::Ready, &calls),
	    state("state-b", SyncState::NotReady, &calls),
	]);

	let results = mgr.sync_state(&Policy{ fail: false }, &InfoCatalog::new()).await;
	assert_eq!(results.status, SyncState::NotReady);
    }

    #[tokio::test]
    async fn failing_state_does_not_stop_the_others() {
	let calls = Arc::new(Mutex::new(vec![]));
	let mgr = Manager::new(vec![
	    state("state-a", SyncState::Ready, &calls),
	    state("state-broken", SyncState::Error, &calls),
	    state("state-c", SyncState::Ready, &calls),
	]);

	let results = mgr.sync_state(&Policy{ fail: true }, &InfoCatalog::new()).await;
	assert_eq!(results.status, SyncState::NotReady);
	assert_eq!(results.states_status.len(), 3);

	let statuses: Vec<SyncState> = results.states_status.iter().map(|r| r.status).collect();
	assert_eq!(statuses, vec![SyncState::Ready, SyncState::Error, SyncState::Ready]);

	let failed = results.first_error().unwrap();
	assert_eq!(failed.state_name, "state-broken");
	assert_eq!(failed.err_info.as_ref().unwrap().to_string(), "`state-broken broke`");
    }

    #[test]
    fn watched_kinds_are_deduplicated_first_wins() {
	let calls = Arc::new(Mutex::new(vec![]));
	let mgr = Manager::new(vec![
	    Box::new(FixedState{
		name: "state-a".to_string(),
		status: SyncState::Ready,
		kinds: vec![("DaemonSet", KindDescriptor::daemon_set())],
		calls: calls.clone(),
	    }) as Box<dyn State<Policy>>,
	    Box::new(FixedState{
		name: "state-b".to_string(),
		status: SyncState::Ready,
		kinds: vec![
		    ("DaemonSet", KindDescriptor::new("apps/v1beta2", "DaemonSet", true)),
		    ("ConfigMap", KindDescriptor::config_map()),
		],
		calls: calls.clone(),
	    }),
	]);

	let kinds = mgr.watched_kinds();
	assert_eq!(kinds, vec![KindDescriptor::daemon_set(), KindDescriptor::config_map()]);
    }
}
