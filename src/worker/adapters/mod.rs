//! Processor implementations.

mod simulated;

pub use simulated::SimulatedProcessor;
