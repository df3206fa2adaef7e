use crate::kind::ObjectKey;
use crate::render::RenderError;
use crate::state::SyncState;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {

    /* encapsulate a kube-rust error */
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /* a cluster API call did not return within the configured deadline */
    #[error("cluster API call timed out after {0:?}")]
    Timeout(Duration),

    /* create/update failures collected over a whole batch */
    #[error("{}", ObjectErrors(.0))]
    Objects(Vec<ObjectError>),

    #[error("info catalog does not provide {0}")]
    MissingInfo(&'static str),

    #[error("invalid object: {0}")]
    InvalidObject(String),

    /* reading back the live status of an object failed */
    #[error("unable to read status of {key}: {reason}")]
    StatusRead { key: ObjectKey, reason: String },

    #[error("`{0}`")]
    Other(String),
}

#[derive(Error, Debug)]
#[error("{key}: {source}")]
pub struct ObjectError {
    pub key: ObjectKey,
    pub source: Box<Error>,
}

struct ObjectErrors<'a>(&'a Vec<ObjectError>);

impl fmt::Display for ObjectErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	write!(f, "{} object(s) failed to create or update", self.0.len())?;
	for err in self.0 {
	    write!(f, "; {}", err)?;
	}
	Ok(())
    }
}

fn is_transient_kube(err: &kube::Error) -> bool {
    match err {
	/* conflicts (stale resourceVersion), throttling and server side failures */
	kube::Error::Api(resp) => resp.code == 409 || resp.code == 429 || resp.code >= 500,
	kube::Error::HyperError(_) => true,
	kube::Error::Service(_) => true,
	_ => false,
    }
}

impl Error {

    /*
     * Whether the condition is expected to resolve by itself on a later
     * reconciliation pass.
     */
    pub fn is_transient(&self) -> bool {
	match self {
	    Error::Kube(err) => is_transient_kube(err),
	    Error::Timeout(_) => true,
	    Error::Objects(errors) => errors.iter().all(|e| e.source.is_transient()),
	    _ => false,
	}
    }

    /*
     * The status a State reports when its sync fails with this error.
     */
    pub fn sync_state(&self) -> SyncState {
	if self.is_transient() {
	    SyncState::NotReady
	} else {
	    SyncState::Error
	}
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
	Error::Kube(kube::Error::Api(ErrorResponse{
	    status: "Failure".to_string(),
	    message: format!("code {}", code),
	    reason: "Test".to_string(),
	    code: code,
	}))
    }

    fn object_error(err: Error) -> ObjectError {
	ObjectError{
	    key: ObjectKey::new("apps", "DaemonSet", Some("netop"), "ds"),
	    source: Box::new(err),
	}
    }

    #[test]
    fn conflicts_and_timeouts_are_transient() {
	assert_eq!(api_error(409).sync_state(), SyncState::NotReady);
	assert_eq!(api_error(503).sync_state(), SyncState::NotReady);
	assert_eq!(Error::Timeout(Duration::from_secs(1)).sync_state(), SyncState::NotReady);
    }

    #[test]
    fn forbidden_and_invalid_are_errors() {
	assert_eq!(api_error(403).sync_state(), SyncState::Error);
	assert_eq!(api_error(422).sync_state(), SyncState::Error);
	assert_eq!(Error::MissingInfo("StaticConfig").sync_state(), SyncState::Error);
    }

    #[test]
    fn object_batch_is_transient_only_if_every_failure_is() {
	let transient = Error::Objects(vec![object_error(api_error(409))]);
	assert!(transient.is_transient());

	let mixed = Error::Objects(vec![object_error(api_error(409)), object_error(api_error(403))]);
	assert!(!mixed.is_transient());
	assert!(mixed.to_string().starts_with("2 object(s) failed"));
	assert!(mixed.to_string().contains("apps/DaemonSet netop/ds"));
    }
}
