//! Port contract for the external credential validator.

mod gate;

pub use gate::{AuthGate, AuthGateError, AuthGateResult};
