pub mod inventory_item;
pub mod reservation;
pub mod reservation_status_history;
pub mod store;
