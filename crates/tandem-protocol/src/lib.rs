//! # tandem-protocol
//!
//! Wire protocol definitions for the Tandem rendezvous relay.
//!
//! Clients speak one of two roles for a session they name themselves: a
//! single controller, and any number of observers. This crate defines the
//! frames they exchange and the codecs used to carry them over WebSocket.
//!
//! ## Frame Types
//!
//! - `controller:register` / `observer:register` - Session membership
//! - `control:set` - Observer to controller command
//! - `control:sync` - Controller to observers state broadcast
//!
//! ## Example
//!
//! ```rust
//! use tandem_protocol::{codec, Frame};
//!
//! let frame = Frame::control_set("living-room", 200);
//!
//! let text = codec::encode_text(&frame).unwrap();
//! assert_eq!(codec::decode_text(&text).unwrap(), frame);
//!
//! let binary = codec::encode(&frame).unwrap();
//! assert_eq!(codec::decode(&binary).unwrap(), frame);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, decode_text, encode, encode_text, Encoded, Encoding, ProtocolError};
pub use frames::{Fields, Frame, FrameKind, SessionId};
