//! Client Stream Transport
//!
//! Carries [`StatusPush`](crate::messages::StatusPush) messages from the
//! [`ClientRegistry`](crate::registry::ClientRegistry) to display clients.
//! Each connection gets its own task and its own bounded channel; the
//! registry only ever sees the channel's sending half.
//!
//! # Available Transports
//!
//! - **WebSocket**: one JSON text frame per push, the URL path selects the
//!   display page

pub mod websocket;

pub use websocket::{page_name_from_path, StreamServer, DEFAULT_PAGE};
