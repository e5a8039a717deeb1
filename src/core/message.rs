//! # Wire Message
//!
//! A message is a fixed 8-byte header followed by an opaque body.
//!
//! ```text
//! [kind: u32 (host order)] [size: u32 (host order)] [body: size bytes]
//! ```
//!
//! The body behaves like a stack of plain-old-data values: [`Message::push`]
//! appends at the tail, [`Message::pop`] removes from the tail, so values come
//! back out in the reverse order they went in.
//!
//! ```rust
//! use tether_net::core::message::Message;
//!
//! let mut msg = Message::new(7u32);
//! msg.push(&1.5f32).push(&42u64);
//! assert_eq!(msg.header.size, 12);
//!
//! let answer: u64 = msg.pop();
//! let ratio: f32 = msg.pop();
//! assert_eq!((answer, ratio), (42, 1.5));
//! assert!(msg.is_empty());
//! ```

use crate::error::{NetError, Result};
use crate::service::connection::Connection;
use bytemuck::Pod;
use std::fmt;
use std::mem;
use std::sync::Arc;

/// Size of the encoded header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Application-defined discriminant carried in every header.
///
/// Encoded on the wire as a `u32`. Use [`message_kind!`](crate::message_kind)
/// to declare an enum that implements this trait.
pub trait MessageKind: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// The wire representation of this kind.
    fn into_raw(self) -> u32;

    /// Map a wire value back to a kind, `None` if the value is not recognised.
    fn from_raw(raw: u32) -> Option<Self>;
}

impl MessageKind for u32 {
    fn into_raw(self) -> u32 {
        self
    }

    fn from_raw(raw: u32) -> Option<Self> {
        Some(raw)
    }
}

/// Declare a `#[repr(u32)]` message-kind enum and implement [`MessageKind`] for it.
///
/// ```rust
/// tether_net::message_kind! {
///     pub enum GameMsg {
///         ServerAccept = 0,
///         ServerPing = 2,
///         MessageAll = 3,
///     }
/// }
///
/// use tether_net::core::message::MessageKind;
/// assert_eq!(GameMsg::from_raw(2), Some(GameMsg::ServerPing));
/// assert_eq!(GameMsg::from_raw(1), None);
/// ```
#[macro_export]
macro_rules! message_kind {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $crate::core::message::MessageKind for $name {
            fn into_raw(self) -> u32 {
                self as u32
            }

            fn from_raw(raw: u32) -> ::core::option::Option<Self> {
                $(
                    if raw == $name::$variant as u32 {
                        return ::core::option::Option::Some($name::$variant);
                    }
                )+
                ::core::option::Option::None
            }
        }
    };
}

/// Header sent at the start of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<T> {
    pub kind: T,
    /// Length of the body in bytes.
    pub size: u32,
}

impl<T: MessageKind> MessageHeader<T> {
    pub fn new(kind: T) -> Self {
        Self { kind, size: 0 }
    }

    /// Encode the header in host byte order.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.kind.into_raw().to_ne_bytes());
        out[4..].copy_from_slice(&self.size.to_ne_bytes());
        out
    }

    /// Decode a header, failing if the kind is not one the application knows.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let raw = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let size = u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let kind = T::from_raw(raw).ok_or(NetError::InvalidMessageKind(raw))?;
        Ok(Self { kind, size })
    }
}

/// A typed envelope: header plus raw body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<T> {
    pub header: MessageHeader<T>,
    pub body: Vec<u8>,
}

impl<T: MessageKind> Message<T> {
    /// Create an empty message of the given kind.
    pub fn new(kind: T) -> Self {
        Self {
            header: MessageHeader::new(kind),
            body: Vec::new(),
        }
    }

    /// Create a message around an existing body.
    ///
    /// # Panics
    /// Panics if `body` is longer than `u32::MAX` bytes.
    pub fn with_body(kind: T, body: Vec<u8>) -> Self {
        let mut msg = Self {
            header: MessageHeader::new(kind),
            body,
        };
        msg.sync_size();
        msg
    }

    pub fn kind(&self) -> T {
        self.header.kind
    }

    /// Size of the whole packet in bytes (header plus body).
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// True when the body holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Append the raw bytes of `value` to the body tail.
    ///
    /// Only [`Pod`] types are accepted, so anything holding pointers or padding
    /// is rejected at compile time.
    ///
    /// # Panics
    /// Panics if the body would grow past `u32::MAX` bytes.
    pub fn push<V: Pod>(&mut self, value: &V) -> &mut Self {
        self.body.extend_from_slice(bytemuck::bytes_of(value));
        self.sync_size();
        self
    }

    /// Remove the last `size_of::<V>()` bytes from the body and return them as a `V`.
    ///
    /// # Panics
    /// Panics if the body holds fewer bytes than a `V`. Popping past what was
    /// pushed is a bug in the caller.
    pub fn pop<V: Pod>(&mut self) -> V {
        let width = mem::size_of::<V>();
        assert!(
            width <= self.body.len(),
            "cannot pop {width} bytes from a {}-byte message body",
            self.body.len()
        );

        let start = self.body.len() - width;
        let value = bytemuck::pod_read_unaligned(&self.body[start..]);
        self.body.truncate(start);
        self.sync_size();
        value
    }

    /// Encode header and body into one contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    fn sync_size(&mut self) {
        self.header.size = match u32::try_from(self.body.len()) {
            Ok(size) => size,
            Err(_) => panic!(
                "message body of {} bytes does not fit the 32-bit size field",
                self.body.len()
            ),
        };
    }
}

impl<T: MessageKind> fmt::Display for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID:{} Size:{}", self.header.kind.into_raw(), self.header.size)
    }
}

/// A received message tagged with the connection it arrived on.
///
/// On the server `remote` is the sending client; on the client it is `None`
/// because the only possible sender is the server.
#[derive(Debug, Clone)]
pub struct OwnedMessage<T: MessageKind> {
    pub remote: Option<Arc<Connection<T>>>,
    pub msg: Message<T>,
}

impl<T: MessageKind> fmt::Display for OwnedMessage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.msg, f)
    }
}
