//! Core module - fundamental types for the network node
//!
//! - `event`: the Event envelope, classification, and reserved names
//! - `response`: structured responses from system event handlers
//! - `context`: the narrow interface mods receive

pub mod context;
pub mod event;
pub mod response;

pub use context::NetworkContext;
pub use event::{Destination, Event, EventClass, Visibility};
pub use response::EventResponse;
