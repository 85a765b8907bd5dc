//! pollcast library
//!
//! A real-time multi-user polling server: clients vote over a persistent
//! WebSocket channel and every connected observer receives the updated poll
//! document after each accepted change.
//!
//! Layering, leaves first: [`polls`] (document model and Vote Engine),
//! [`store`] (durable document), [`broadcast`] (open channel set),
//! [`service`] (the serialized mutation cycle), [`server`] (HTTP and
//! WebSocket surface).

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod polls;
pub mod server;
pub mod service;
pub mod store;
