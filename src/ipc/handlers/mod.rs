pub mod auth;
pub mod backup_exchange;
pub mod core;
pub mod results;
pub mod students;
pub mod teachers;
