pub mod academic;
pub mod audit;
pub mod backup;
pub mod core;
pub mod fees;
pub mod ledger;
pub mod notifications;
pub mod portal;
pub mod reports;
pub mod students;
pub mod users;
