//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (location REST API).
pub mod ports;

/// Application services: history cache, sync engine, location simulator.
pub mod services;
