//! Workspace manager orchestration
//!
//! Workspaces, their per-cloud contexts and their controlled resources are created and
//! deleted by flights: ordered steps with compensation, persisted after every step so a
//! restarted process can resume them. Access to every controlled resource is held in an
//! external identity broker and mirrored onto the cloud objects.
//!
//! [`WorkspaceManager`] is the entry point. It is consumed by the wsm-server binary but can
//! also be embedded in tests or other services.

pub mod clone;
pub mod cloud;
pub mod context;
pub mod dao;
pub mod db;
mod deps;
pub mod error;
pub mod flight;
pub mod iam;
pub mod keys;
pub mod model;
mod remote;
pub mod resource;
pub mod service;
pub mod state;
pub mod workspace;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use clone::{ClonePlan, CloneStage};
pub use error::{ErrorKind, FlightError, OrchestratorError, Result};
pub use flight::{FlightDebugInfo, FlightEngine, FlightState, FlightStatus, InjectedFailure};
pub use service::{
    flight_failure, CloudContextRequest, CreateControlledResourceRequest, CreateReferencedResourceRequest,
    CreateWorkspaceRequest, ManagerOptions, WorkspaceManager, WorkspaceManagerBuilder,
};
pub use state::{PrivateResourceState, StateRule, WsmResourceState};
