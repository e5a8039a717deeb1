//! # Transport Layer
//!
//! Event-loop plumbing shared by the client and server facades.

pub mod reactor;

pub use reactor::Reactor;
