/// WebSocket 传输层 / WebSocket transport
pub mod connection;
pub mod handler;
pub mod hub;
pub mod server;

pub use hub::{room_key, SessionHub};
