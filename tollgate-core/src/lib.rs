pub mod clock;
pub mod context;
pub mod engine;
pub mod error;
pub mod registry;
pub mod reporter;
pub mod settings;
pub mod store;
pub mod sweeper;
pub mod tier;

pub use context::{AuthenticatedUser, ContextBuilder, RequestContext};
pub use engine::{AdmissionDecision, AdmissionEngine, DecisionReason};
pub use error::{GateError, ReportError, StoreError};
pub use registry::TierRegistry;
pub use tier::TierConfig;
