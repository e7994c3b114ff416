//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `LocationSyncEngine`: Keeps the location table and view in sync
//! - `HistoryCache`: Fetches history tracks for the selected users
//! - `LocationSimulator`: Injects synthetic updates through the API

mod engine;
mod history;
mod simulator;

pub use engine::{LocationSyncEngine, STORE_SUBSCRIBER};
pub use history::{DEFAULT_HISTORY_LIMIT, HistoryCache, RefreshOutcome};
pub use simulator::{BoundingBox, LocationSimulator, SimulatorError};
