//! Service wiring.

pub mod container;

pub use container::ServiceContainer;
