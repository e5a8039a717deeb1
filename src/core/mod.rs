//! # Core Message Components
//!
//! The wire message and its framing codec.
//!
//! ## Components
//! - **Message**: typed header plus a body used as a stack of plain-old-data values
//! - **Codec**: Tokio codec for header-then-body framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Kind(4)] [Size(4)] [Body(Size)]
//! ```
//! Both header fields use host byte order, so peers must share endianness.
//!
//! ## Limits
//! - Bodies larger than the configured maximum (16MB by default) are rejected
//!   before any allocation for them happens

pub mod codec;
pub mod message;
