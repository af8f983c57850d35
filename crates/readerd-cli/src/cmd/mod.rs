pub mod inventory;
pub mod watch;
