//! # Protocol Layer
//!
//! The connection validation handshake that runs before any message traffic.

pub mod handshake;

#[cfg(test)]
mod tests;
