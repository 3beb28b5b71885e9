pub mod account;
pub mod notification;
pub mod response;
pub mod stream;
pub mod task;
