pub mod correlator;
pub mod dispatch;
pub mod intake;
pub mod models;
pub mod store;
pub mod watchdog;
