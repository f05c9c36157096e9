//! Simulated AI chat backend and the client-side stream consumer.
//!
//! The producer turns a canned [`protocol::ResponseConfig`] into SSE frames;
//! the consumer decodes those frames from arbitrarily split chunks and folds
//! them into [`reducer::SessionState`].

pub mod backend;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod producer;
pub mod protocol;
pub mod reducer;
pub mod render;
pub mod scenario;
pub mod server;
pub mod session;
pub mod store;
pub mod tools;
