//! ladder-lifecycle — namespace and release lifecycle for Ladder.
//!
//! Everything the pipeline does to the outside world goes through the
//! three backend traits in [`backend`]. The CLI-backed implementations
//! shell out via a [`CommandRunner`]; [`MemoryCluster`] implements all of
//! them in memory for simulation and tests.
//!
//! # Architecture
//!
//! ```text
//! LifecycleManager
//!   ├── Orchestrator    (Kubectl | MemoryCluster)
//!   │   └── namespaces, services, connectivity
//!   ├── PackageManager  (Helm | MemoryCluster)
//!   │   └── repo refresh, list/delete/upgrade --install
//!   └── per-(namespace, release) install lock
//!
//! LocalEnvironment      (DockerHost | MemoryCluster)
//!   └── stale container removal, image pulls, default route
//! ```

pub mod backend;
pub mod error;
pub mod helm;
pub mod kubectl;
pub mod local;
pub mod manager;
pub mod memory;
pub mod runner;

pub use backend::{ChartSpec, LocalEnvironment, Orchestrator, PackageManager, Repository, Service};
pub use error::{LifecycleError, LifecycleResult};
pub use helm::Helm;
pub use kubectl::Kubectl;
pub use local::DockerHost;
pub use manager::{LifecycleManager, NamespaceAction};
pub use memory::{FailPoint, MemoryCluster};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
