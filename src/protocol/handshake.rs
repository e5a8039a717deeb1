//! Challenge/response validation run on every new connection.
//!
//! The server sends a raw 64-bit challenge, the client sends back
//! [`transform`] of it, and the server compares that with the answer it
//! computed up front. Both values travel unframed, 8 bytes each, in host byte
//! order.
//!
//! This keeps out scripted or mismatched clients. It is not authentication:
//! the challenge comes from a clock-seeded PRNG and the transform is public.
//! A wrong answer is answered with a silent close, which the client cannot
//! tell apart from any other network failure.

use crate::error::{constants, NetError, Result};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tracing::{debug, instrument, warn};

const FIRST_MASK: u64 = 0xDEAD_BEEF_C0DE_CAFE;
const SECOND_MASK: u64 = 0xC0DE_FACE_1234_5678;
const HIGH_NIBBLES: u64 = 0xF0F0_F0F0_F0F0_F0F0;
const LOW_NIBBLES: u64 = 0x0F0F_0F0F_0F0F_0F0F;

static CHALLENGES_ISSUED: AtomicU64 = AtomicU64::new(0);

/// The answer a client must send for `input`.
///
/// XOR with a constant, swap the nibbles of every byte, XOR with a second
/// constant. Every step is invertible.
pub fn transform(input: u64) -> u64 {
    let out = input ^ FIRST_MASK;
    let out = ((out & HIGH_NIBBLES) >> 4) | ((out & LOW_NIBBLES) << 4);
    out ^ SECOND_MASK
}

/// Nanoseconds since the Unix epoch, mixed with a per-process counter so two
/// challenges issued in the same tick still get different seeds.
pub(crate) fn clock_seed() -> u64 {
    // A clock set before 1970 still yields a usable, if weak, seed
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_nanos() as u64)
        .unwrap_or_default();
    let issued = CHALLENGES_ISSUED.fetch_add(1, Ordering::Relaxed);
    nanos ^ issued.rotate_left(32)
}

/// Server-side handshake state: the challenge sent and the answer expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    value: u64,
    expected: u64,
}

impl Challenge {
    /// Draw a fresh pseudo-random challenge.
    pub fn generate() -> Self {
        let mut rng = StdRng::seed_from_u64(clock_seed());
        Self::from_value(rng.next_u64())
    }

    /// Build a challenge around a known value.
    pub fn from_value(value: u64) -> Self {
        Self {
            value,
            expected: transform(value),
        }
    }

    /// The raw value sent to the client.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The answer a well-behaved client sends back.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn verify(&self, answer: u64) -> bool {
        answer == self.expected
    }
}

/// Run one handshake half, giving up after `limit`.
///
/// # Errors
/// `NetError::HandshakeTimeout` if `limit` passes first, otherwise whatever
/// the exchange returned.
pub async fn with_timeout<F, V>(limit: Duration, exchange: F) -> Result<V>
where
    F: Future<Output = Result<V>>,
{
    tokio::time::timeout(limit, exchange)
        .await
        .map_err(|_| NetError::HandshakeTimeout)?
}

/// Read one unframed 8-byte handshake value.
async fn read_value<S>(stream: &mut S) -> Result<u64>
where
    S: AsyncRead + Unpin,
{
    let mut raw = [0u8; 8];
    match stream.read_exact(&mut raw).await {
        Ok(_) => Ok(u64::from_ne_bytes(raw)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(NetError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

/// Server half: send the challenge, read the answer, check it.
///
/// # Errors
/// `NetError::HandshakeFailed` if the answer is wrong,
/// `NetError::ConnectionClosed` if the peer hangs up before answering, and
/// `NetError::Io` if the exchange itself fails.
#[instrument(skip(stream), level = "debug")]
pub async fn server_handshake<S>(stream: &mut S, challenge: &Challenge) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&challenge.value().to_ne_bytes()).await?;
    stream.flush().await?;

    let answer = read_value(stream).await?;

    if challenge.verify(answer) {
        debug!("Handshake answer accepted");
        Ok(())
    } else {
        warn!(
            answer,
            reason = constants::ERR_HANDSHAKE_MISMATCH,
            "Handshake rejected"
        );
        Err(NetError::HandshakeFailed)
    }
}

/// Client half: read the challenge and send back its transform.
///
/// The client does not wait for any confirmation; a server that disagrees
/// simply closes the socket. Returns the answer that was sent.
#[instrument(skip(stream), level = "debug")]
pub async fn client_handshake<S>(stream: &mut S) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let challenge = read_value(stream).await?;

    let answer = transform(challenge);
    stream.write_all(&answer.to_ne_bytes()).await?;
    stream.flush().await?;

    debug!("Handshake answer sent");
    Ok(answer)
}
