pub mod notifications;
pub mod tasks;
