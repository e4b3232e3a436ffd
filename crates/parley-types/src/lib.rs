pub mod events;
pub mod models;
pub mod notify;
pub mod rooms;
