//! v-talk-im：即时通讯的在线状态与消息投递引擎
//! Presence and message delivery engine for an instant messaging backend.

pub mod api;
pub mod collab;
pub mod comm;
pub mod config;
pub mod domain;
pub mod error;
pub mod presence;
pub mod server;
pub mod service;
pub mod storage;
pub mod ws;

pub use error::{ChatError, ChatResult};
pub use server::{ChatServer, Components};
