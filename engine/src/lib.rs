//! warden-engine
//!
//! Process supervisor and orchestration engine: a registry of long-running
//! OS processes with lifecycle control, resource-based health monitoring,
//! durable state, and a command/response surface over a pub/sub bus.
//!
//! The component graph (root first):
//! [`Supervisor`] → [`ProcessManager`] → [`HealthMonitor`] → [`ProcessHandle`],
//! with [`StateManager`] and [`CommandDispatcher`] alongside. Infrastructure
//! (bus, store, sampler) is injected through the [`domain::ports`] traits via
//! a [`ServiceContext`].

pub mod config;
pub mod constants;
pub mod domain;
pub mod infrastructure;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use domain::{
    Command, Event, EventType, MetricSample, ProcessDescriptor, ProcessMetadata, ProcessStatus,
    Response, RestartPolicy, Result, SupervisorError,
};
pub use supervisor::{ProcessSnapshot, ServiceContext, Supervisor};
