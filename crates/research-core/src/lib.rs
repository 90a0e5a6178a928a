pub mod artifact_store;
pub mod config;
pub mod event_bus;
pub mod facade;
pub mod governor;
pub mod ledger;
pub mod poller;
pub mod queue;
pub mod router;

pub const DEFAULT_ENGINE_HOST: &str = "127.0.0.1";
pub const DEFAULT_ENGINE_PORT: u16 = 39731;

pub use artifact_store::ArtifactStore;
pub use config::{ConfigStore, EngineConfig};
pub use event_bus::EventBus;
pub use facade::{wrap_idempotent, EngineFacade, SubmitOutcome};
pub use governor::{CostGovernor, GovernorDecision};
pub use ledger::CostLedger;
pub use poller::Poller;
pub use queue::{JobQueue, QueueError};
pub use router::{Candidate, RouteRequest, Router};
