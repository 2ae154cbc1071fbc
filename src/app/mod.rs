//! Application layer: pipeline stages, the deposit service and shared state.

pub mod confirmation;
pub mod listener;
pub mod service;
pub mod state;
pub mod sweep;
pub mod worker;

pub use confirmation::{ConfirmationTracker, TickReport, TrackerConfig};
pub use listener::{
    AddressBook, CatchUpReport, DepositListener, ListenerConfig, TransferOutcome,
};
pub use service::{DepositService, MAX_LIST_LIMIT};
pub use state::AppState;
pub use sweep::{SweepConfig, SweepEngine, SweepReport};
pub use worker::{
    WorkerHandle, spawn_confirmation_tracker, spawn_listener, spawn_sweep_engine,
};
