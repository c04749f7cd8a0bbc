//! # tandem-server
//!
//! WebSocket server for the Tandem rendezvous relay.
//!
//! Clients connect to the WebSocket endpoint, register as the controller or
//! an observer of a session they name, and exchange `control:set` and
//! `control:sync` frames through the relay.

pub mod config;
pub mod handlers;
pub mod metrics;
