//! Subprocess containment.
//!
//! A [`Manager`] holds providers in preference order (Docker and Bubblewrap
//! by default) followed by a no-isolation fallback. Availability is probed
//! on every selection. When only the fallback remains, the degradation
//! policy in [`assessment`] decides whether to continue:
//!
//! ```text
//! decide_provider ──► Docker? ──► Bubblewrap? ──► fallback
//!                                                    │
//!                    decide_on_containment_failure ◄─┘
//!                      allow_fallback && degradable ──► run at level 0
//!                      otherwise                   ──► abort
//! ```
//!
//! Providers only build a [`CommandSpec`]; starting and waiting on the
//! process belongs to the caller (see [`executor::run_prepared`]).

pub mod assessment;
pub mod bubblewrap;
pub mod docker;
pub mod executor;
pub mod failure;
pub mod fallback;
pub mod manager;
pub mod provider;

pub use assessment::{
    DegradationDecision, SecurityAssessment, assess_security_level, decide_on_containment_failure,
};
pub use executor::{ExecOutput, PreparedExecution, SandboxError, prepare_sandboxed, run_prepared};
pub use failure::{ContainmentFailure, FailureCode, FailureResponse};
pub use manager::{ContainmentStatus, Manager, ProviderCheck, ProviderDecision};
pub use provider::{
    CommandSpec, ContainmentProvider, ExecutionConfig, PrepareError, ProviderInfo, ProviderType,
};
