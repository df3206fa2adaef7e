use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {

    /* encapsulate a kube-rust error */
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    /* a state could not be built, e.g: its manifest directory is missing */
    #[error("state error: {0}")]
    State(#[from] statec::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
