//! # tandem-core
//!
//! Session registry, routing, and connection lifecycle for the Tandem
//! rendezvous relay.
//!
//! - **ConnectionManager** - Handles and outbound queues of live connections
//! - **Registry** - Which connection controls, and which observe, a session
//! - **Router** - Where a frame goes, given the registry
//! - **Hub** - Single task that owns the registry and purges on disconnect
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  events  ┌─────────────┐     ┌─────────────┐
//! │  Connection │─────────▶│     Hub     │────▶│  Registry   │
//! └─────────────┘          └─────────────┘     └─────────────┘
//!        ▲                        │
//!        │ outbound queue         ▼
//! ┌─────────────┐          ┌─────────────┐
//! │ Connection  │◀─────────│   Router    │
//! │  Manager    │          └─────────────┘
//! └─────────────┘
//! ```

pub mod connection;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod router;

pub use connection::{ConnectionHandle, ConnectionManager, Delivery, Outbound};
pub use hub::{Hub, HubError, HubEvent, HubHandle, HubStats};
pub use registry::{PurgeReport, Registry, RegistryStats};
pub use router::{dispatch, Dispatch, DropReason};
