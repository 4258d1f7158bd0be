//! tierform - declarative cloud resource orchestrator
//!
//! Reads a TOML declaration document, orders resources by the references
//! between them, plans the difference against recorded state and converges
//! real resources through a provider, wave by wave.

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod output;
pub mod plan;
pub mod providers;
pub mod resource;
pub mod schema;
pub mod state;

pub use engine::{Engine, Mode};
pub use error::{ConfigError, TierformError};
pub use executor::{ExecutionResult, Outcome};
pub use plan::{Action, Plan};
pub use providers::{Provider, ProviderError};
pub use resource::{ResourceDeclaration, ResourceId};
pub use state::{ResourceState, StateStore};
