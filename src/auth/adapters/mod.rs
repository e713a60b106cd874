//! Auth gate adapters.

mod http;
mod memory;

pub use http::HttpAuthGate;
pub use memory::StaticAuthGate;
