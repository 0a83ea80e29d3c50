//! Binary wire codec for teleportal protocol messages (§4.A).
//!
//! [`frame`] handles the top-level [`teleportal_primitives::Message`]
//! envelope; [`encrypted_sync`] handles the three encrypted-document
//! sub-shapes (state vector, update list, deduplicated sync-step-2) nested
//! inside it. [`bytes`] is the shared LEB128/length-prefixed primitive
//! layer both build on.

pub mod bytes;
pub mod encrypted_sync;
pub mod error;
pub mod frame;

pub use error::CodecError;
pub use frame::{content_id, decode, encode};
