//! Message routing.

pub mod router;

pub use router::{CommandRouter, DispatchOutcome};
