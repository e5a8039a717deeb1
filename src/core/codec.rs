//! Header-then-body framing codec.
//!
//! The decoder works in two stages: it waits for a full header, validates the
//! announced body length, then waits for exactly that many body bytes. A
//! decoded header is kept between calls so the header is parsed once.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_BODY_SIZE;
use crate::core::message::{Message, MessageHeader, MessageKind, HEADER_SIZE};
use crate::error::{NetError, Result};

/// Codec for [`Message`] framing over a byte stream.
#[derive(Debug)]
pub struct MessageCodec<T> {
    max_body_size: usize,
    /// Header of the message currently being assembled.
    current: Option<MessageHeader<T>>,
}

impl<T: MessageKind> MessageCodec<T> {
    pub fn new(max_body_size: usize) -> Self {
        Self {
            max_body_size,
            current: None,
        }
    }
}

impl<T: MessageKind> Default for MessageCodec<T> {
    fn default() -> Self {
        Self::new(MAX_BODY_SIZE)
    }
}

impl<T: MessageKind> Decoder for MessageCodec<T> {
    type Item = Message<T>;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let header = match self.current {
            Some(header) => header,
            None => {
                if src.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let mut raw = [0u8; HEADER_SIZE];
                raw.copy_from_slice(&src[..HEADER_SIZE]);
                let header = MessageHeader::<T>::from_bytes(&raw)?;

                let size = header.size as usize;
                if size > self.max_body_size {
                    return Err(NetError::OversizedMessage {
                        size,
                        max: self.max_body_size,
                    });
                }

                src.advance(HEADER_SIZE);
                self.current = Some(header);
                header
            }
        };

        let size = header.size as usize;
        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        let body = src.split_to(size).to_vec();
        self.current = None;
        Ok(Some(Message { header, body }))
    }
}

impl<T: MessageKind> Encoder<Message<T>> for MessageCodec<T> {
    type Error = NetError;

    fn encode(&mut self, item: Message<T>, dst: &mut BytesMut) -> Result<()> {
        if item.body.len() > self.max_body_size {
            return Err(NetError::OversizedMessage {
                size: item.body.len(),
                max: self.max_body_size,
            });
        }

        dst.reserve(item.size());
        dst.put_slice(&item.header.to_bytes());
        dst.put_slice(&item.body);
        Ok(())
    }
}
