// Core services
pub mod inventory;
pub mod reservations;
pub mod stores;

// Pure state machine used by the ledger
pub mod transitions;

pub use inventory::{CreateItemInput, InventoryService, ReservationHold, UpdateItemInput};
pub use reservations::{ReservationLedger, StatusChange};
pub use stores::StoreService;
