//! Server lifecycle services.
//!
//! `creation` holds the provisioning orchestrator, the core saga of the
//! panel. `deletion` is its compensation path (and the normal delete flow).
//! `variables` validates egg configuration before anything is written, and
//! `configuration` renders a committed record into the daemon payload.

mod configuration;
mod creation;
mod deletion;
mod variables;

pub use configuration::{
    structure, AllocationBinding, AllocationMappings, BuildLimits, Container, EggRef,
    ServerConfiguration,
};
pub use creation::{
    CreateServer, CreationError, Deployment, FeatureLimits, Limits, ServerCreationService,
    MAX_UUID_ATTEMPTS,
};
pub use deletion::{DeletionError, ServerDeletion, ServerDeletionService};
pub use variables::{
    ConfigurationError, EggVariableValidator, UserLevel, ValidatedVariable, VariableValidator,
    VariableViolation,
};
