pub mod inventory;
pub mod menu;
pub mod orders;
pub mod reports;
pub mod snapshot;
