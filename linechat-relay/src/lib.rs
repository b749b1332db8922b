//! linechat relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The server
//! accepts TCP clients, queues every line they send, and broadcasts each
//! line to all connected clients, the sender included.

mod broadcast;
pub mod config;
pub mod event;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod shutdown;
