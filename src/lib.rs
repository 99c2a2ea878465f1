//! dockspace: containerized development environments on a Docker engine
//! that runs locally or on a remote host reachable only over SSH.
//!
//! A target's options blob is resolved into [`ConnectionOptions`]. Remote
//! targets get their daemon socket forwarded to a local path through an SSH
//! tunnel, and the [`EngineFactory`] hands out clients over it. The
//! [`Orchestrator`] drives networks, containers, volumes, image pulls and
//! in-container provisioning, writing progress into a [`LogSink`]. The
//! [`Provider`] ties these together per workspace and project.

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod logs;
pub mod options;
pub mod orchestrator;
pub mod paths;
pub mod provider;
pub mod tunnel;
pub mod types;

pub use config::ProviderConfig;
pub use engine::{Engine, EngineConnector, EngineFactory};
pub use error::{Error, ResourceKind, Result};
pub use logs::LogSink;
pub use options::ConnectionOptions;
pub use orchestrator::Orchestrator;
pub use provider::{ProjectRequest, Provider, WorkspaceRequest};
pub use types::{Project, ProjectInfo, Repository, Target, Workspace, WorkspaceInfo};
