/*
 * statec - a manifest driven reconciliation engine.
 *
 * A State renders its manifest templates, converges the live objects
 * towards them (StateSkel) and reports a SyncState; a Manager runs many
 * states in order and aggregates their outcome.
 */

pub mod client;
pub use client::ClusterClient;
pub use client::KubeClusterClient;

pub mod errors;
pub use errors::Error;
pub use errors::ObjectError;

pub mod info;
pub use info::InfoCatalog;

pub mod kind;
pub use kind::KindDescriptor;
pub use kind::ObjectKey;
pub use kind::Readiness;

pub mod manager;
pub use manager::Manager;
pub use manager::Results;
pub use manager::StateResult;

pub mod render;
pub use render::Renderer;
pub use render::RenderError;
pub use render::TemplatingData;

pub mod skel;
pub use skel::StateSkel;

pub mod state;
pub use state::State;
pub use state::SyncState;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
