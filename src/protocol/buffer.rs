//! Wire buffer - cursor-addressed call payload with a marshal side table.
//!
//! Every call and every result moves as one framed message:
//!
//! ```text
//! ┌────────────┬────────────────────────────────────────────────┐
//! │ Length     │ Body                                           │
//! │ 8 bytes LE │ [scalar_len u64][scalars][marshal_count u64]   │
//! │            │ [marshal entries, 8 bytes each]                │
//! └────────────┴────────────────────────────────────────────────┘
//! ```
//!
//! Scalars are appended in their fixed-width little-endian representation,
//! in staging order. Pointer-valued payloads go into the marshal table as
//! opaque [`RemoteHandle`] entries, because a raw address has no meaning in
//! the receiver's address space. The two tables keep independent orderings
//! and independent read cursors, so the reader consumes each table in
//! exactly the order the writer staged it.

use bytes::{Bytes, BytesMut};
use std::marker::PhantomData;

use super::RemoteHandle;
use crate::error::{GpuWireError, Result};
use crate::transport::{read_exact_into, write_all_into, Communicator};

/// Length-header size in bytes (fixed, exactly 8).
pub const FRAME_HEADER_LEN: usize = 8;

/// Maximum accepted body length (1 GiB). A header declaring more is a
/// framing desync, fatal to the connection.
pub const MAX_BODY_LEN: u64 = 1 << 30;

/// A fixed-width value that can travel in the scalar table.
///
/// Implemented for the integer and floating-point primitives. The width is
/// the type's native size; the wire representation is little-endian.
pub trait Scalar: Copy + Send + 'static {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Append the little-endian representation.
    fn put(self, out: &mut BytesMut);

    /// Decode from exactly [`Self::WIDTH`] bytes.
    fn take(raw: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {$(
        impl Scalar for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            #[inline]
            fn put(self, out: &mut BytesMut) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn take(raw: &[u8]) -> Self {
                let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                bytes.copy_from_slice(raw);
                <$ty>::from_le_bytes(bytes)
            }
        }
    )*};
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Typed token for a reserved out-parameter slot inside a [`Buffer`].
///
/// Returned by [`Buffer::assign`]; redeemed with [`Buffer::fill`] once the
/// native call has produced the value. The token never exposes an address.
#[derive(Debug, Clone, Copy)]
pub struct OutSlot<T: Scalar> {
    offset: usize,
    _marker: PhantomData<fn() -> T>,
}

/// Cursor-addressed byte container with a marshal side table.
///
/// Created per call, discarded after the call's result is dumped or
/// decoded. Reads never pass the write length: consuming more than what
/// remains yields [`GpuWireError::BufferUnderrun`], not a panic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Buffer {
    scalars: BytesMut,
    marshal: Vec<RemoteHandle>,
    read_cursor: usize,
    marshal_cursor: usize,
}

impl Buffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with pre-allocated scalar capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            scalars: BytesMut::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Append one scalar value.
    pub fn add<T: Scalar>(&mut self, value: T) {
        value.put(&mut self.scalars);
    }

    /// Append a contiguous scalar run, prefixed with its element count.
    ///
    /// This is how host-memory argument blocks travel: the receiver calls
    /// [`Buffer::get_vec`] and owns a local copy.
    pub fn add_slice<T: Scalar>(&mut self, values: &[T]) {
        self.add::<u64>(values.len() as u64);
        for &value in values {
            value.put(&mut self.scalars);
        }
    }

    /// Append a pointer identity to the marshal table.
    pub fn add_marshal(&mut self, handle: RemoteHandle) {
        self.marshal.push(handle);
    }

    /// Reserve zeroed space for an out-parameter of type `T` and return a
    /// typed slot token. The callee writes the produced value in place with
    /// [`Buffer::fill`].
    pub fn assign<T: Scalar>(&mut self) -> OutSlot<T> {
        let offset = self.scalars.len();
        self.scalars.resize(offset + T::WIDTH, 0);
        OutSlot {
            offset,
            _marker: PhantomData,
        }
    }

    /// Write `value` into a slot previously reserved with [`Buffer::assign`].
    pub fn fill<T: Scalar>(&mut self, slot: OutSlot<T>, value: T) {
        let mut raw = BytesMut::with_capacity(T::WIDTH);
        value.put(&mut raw);
        self.scalars[slot.offset..slot.offset + T::WIDTH].copy_from_slice(&raw);
    }

    /// Consume the next scalar, advancing the scalar read cursor.
    pub fn get<T: Scalar>(&mut self) -> Result<T> {
        let remaining = self.scalars.len() - self.read_cursor;
        if remaining < T::WIDTH {
            return Err(GpuWireError::BufferUnderrun {
                needed: T::WIDTH - remaining,
                remaining,
            });
        }
        let end = self.read_cursor + T::WIDTH;
        let value = T::take(&self.scalars[self.read_cursor..end]);
        self.read_cursor = end;
        Ok(value)
    }

    /// Consume a count-prefixed scalar run staged with [`Buffer::add_slice`].
    pub fn get_vec<T: Scalar>(&mut self) -> Result<Vec<T>> {
        let count = self.get::<u64>()? as usize;
        let needed = count.saturating_mul(T::WIDTH);
        let remaining = self.scalars.len() - self.read_cursor;
        if remaining < needed {
            return Err(GpuWireError::BufferUnderrun {
                needed: needed - remaining,
                remaining,
            });
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.get::<T>()?);
        }
        Ok(values)
    }

    /// Consume the next marshal table entry, advancing the marshal cursor.
    pub fn get_marshal(&mut self) -> Result<RemoteHandle> {
        let handle = self
            .marshal
            .get(self.marshal_cursor)
            .copied()
            .ok_or(GpuWireError::BufferUnderrun {
                needed: 8,
                remaining: 0,
            })?;
        self.marshal_cursor += 1;
        Ok(handle)
    }

    /// Bytes staged in the scalar table.
    pub fn scalar_len(&self) -> usize {
        self.scalars.len()
    }

    /// Entries staged in the marshal table.
    pub fn marshal_len(&self) -> usize {
        self.marshal.len()
    }

    /// True when nothing has been staged in either table.
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.marshal.is_empty()
    }

    /// Encode the body: scalar section then marshal section.
    pub fn to_body(&self) -> Bytes {
        let mut out =
            BytesMut::with_capacity(16 + self.scalars.len() + 8 * self.marshal.len());
        (self.scalars.len() as u64).put(&mut out);
        out.extend_from_slice(&self.scalars);
        (self.marshal.len() as u64).put(&mut out);
        for handle in &self.marshal {
            handle.raw().put(&mut out);
        }
        out.freeze()
    }

    /// Decode a body produced by [`Buffer::to_body`], cursors at zero.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let mut at = 0usize;
        let scalar_len = read_u64(body, &mut at)? as usize;
        if body.len() - at < scalar_len {
            return Err(GpuWireError::Protocol(format!(
                "scalar section declares {} byte(s), {} available",
                scalar_len,
                body.len() - at
            )));
        }
        let scalars = BytesMut::from(&body[at..at + scalar_len]);
        at += scalar_len;

        let marshal_count = read_u64(body, &mut at)? as usize;
        if (body.len() - at) / 8 < marshal_count {
            return Err(GpuWireError::Protocol(format!(
                "marshal section declares {} entrie(s), {} byte(s) available",
                marshal_count,
                body.len() - at
            )));
        }
        let mut marshal = Vec::with_capacity(marshal_count);
        for _ in 0..marshal_count {
            marshal.push(RemoteHandle::from_raw(read_u64(body, &mut at)?));
        }
        if at != body.len() {
            return Err(GpuWireError::Protocol(format!(
                "{} trailing byte(s) after marshal section",
                body.len() - at
            )));
        }

        Ok(Self {
            scalars,
            marshal,
            read_cursor: 0,
            marshal_cursor: 0,
        })
    }

    /// Write this buffer through a communicator: the 8-byte length header,
    /// then the body, then a flush.
    ///
    /// The buffer is channel-agnostic: under a hybrid transport the header
    /// travels the control channel and the body may be rerouted to the bulk
    /// channel, but that routing lives entirely inside the communicator.
    pub async fn dump(&self, comm: &mut dyn Communicator) -> Result<()> {
        let body = self.to_body();
        let header = (body.len() as u64).to_le_bytes();
        write_all_into(comm, &header).await?;
        write_all_into(comm, &body).await?;
        comm.sync().await
    }

    /// Replace this buffer with one read from a communicator.
    ///
    /// Blocks for exactly 8 header bytes, then for exactly the declared
    /// body length, then resets both cursors to zero. A short read of the
    /// header itself surfaces as [`GpuWireError::ConnectionClosed`], never
    /// as a short payload.
    pub async fn reset(&mut self, comm: &mut dyn Communicator) -> Result<()> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        read_exact_into(comm, &mut header).await?;
        let body_len = u64::from_le_bytes(header);
        if body_len > MAX_BODY_LEN {
            return Err(GpuWireError::Protocol(format!(
                "declared body length {} exceeds limit {}",
                body_len, MAX_BODY_LEN
            )));
        }
        let mut body = vec![0u8; body_len as usize];
        read_exact_into(comm, &mut body).await?;
        *self = Self::from_body(&body)?;
        Ok(())
    }
}

fn read_u64(body: &[u8], at: &mut usize) -> Result<u64> {
    let end = *at + 8;
    if body.len() < end {
        return Err(GpuWireError::Protocol(
            "truncated section header in buffer body".to_string(),
        ));
    }
    let value = u64::take(&body[*at..end]);
    *at = end;
    Ok(value)
}
