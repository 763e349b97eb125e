//! Result envelope - what a handler's execution sends back.
//!
//! Wire shape, framed like every other message:
//!
//! ```text
//! ┌────────────┬──────────┬─────────────┬───────────────────────┐
//! │ Length     │ Status   │ Elapsed     │ Output buffer body    │
//! │ 8 bytes LE │ i32 LE   │ f64 secs LE │ (see buffer module)   │
//! └────────────┴──────────┴─────────────┴───────────────────────┘
//! ```

use bytes::BytesMut;
use std::time::Duration;

use super::buffer::{Buffer, Scalar, FRAME_HEADER_LEN, MAX_BODY_LEN};
use crate::error::{GpuWireError, Result};
use crate::transport::{read_exact_into, write_all_into, Communicator};

/// Status of a successfully executed routine.
pub const STATUS_OK: i32 = 0;

/// Fixed status for a routine no loaded handler recognizes.
pub const STATUS_UNKNOWN_ROUTINE: i32 = -1;

/// Response envelope for one call: status code, output buffer, elapsed
/// wall-clock time.
///
/// Created once per call by a handler; the process attaches the elapsed
/// time afterwards; consumed once by the peer. Not mutated beyond that.
#[derive(Debug)]
pub struct RoutineResult {
    exit_code: i32,
    output: Buffer,
    time_taken: Option<Duration>,
}

impl RoutineResult {
    /// Create a result with an explicit status and output buffer.
    pub fn new(exit_code: i32, output: Buffer) -> Self {
        Self {
            exit_code,
            output,
            time_taken: None,
        }
    }

    /// Successful result carrying `output`.
    pub fn ok(output: Buffer) -> Self {
        Self::new(STATUS_OK, output)
    }

    /// Error result with a library-specific status and an empty buffer.
    pub fn error(exit_code: i32) -> Self {
        Self::new(exit_code, Buffer::new())
    }

    /// The fixed error result for an unrecognized routine name.
    pub fn unknown_routine() -> Self {
        Self::error(STATUS_UNKNOWN_ROUTINE)
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == STATUS_OK
    }

    pub fn output(&self) -> &Buffer {
        &self.output
    }

    /// Consume the envelope, keeping the output buffer.
    pub fn into_output(self) -> Buffer {
        self.output
    }

    /// Wall-clock execution time, attached by the serving process.
    pub fn time_taken(&self) -> Option<Duration> {
        self.time_taken
    }

    pub(crate) fn attach_time(&mut self, elapsed: Duration) {
        self.time_taken = Some(elapsed);
    }

    /// Write the envelope through a communicator and flush.
    pub async fn dump(&self, comm: &mut dyn Communicator) -> Result<()> {
        let buffer_body = self.output.to_body();
        let mut body = BytesMut::with_capacity(12 + buffer_body.len());
        self.exit_code.put(&mut body);
        // Negative elapsed marks "never attached" (e.g. unknown routine).
        self.time_taken
            .map(|d| d.as_secs_f64())
            .unwrap_or(-1.0)
            .put(&mut body);
        body.extend_from_slice(&buffer_body);

        let header = (body.len() as u64).to_le_bytes();
        write_all_into(comm, &header).await?;
        write_all_into(comm, &body).await?;
        comm.sync().await
    }

    /// Block for one envelope from a communicator and decode it.
    pub async fn receive(comm: &mut dyn Communicator) -> Result<Self> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        read_exact_into(comm, &mut header).await?;
        let body_len = u64::from_le_bytes(header);
        if body_len > MAX_BODY_LEN {
            return Err(GpuWireError::Protocol(format!(
                "declared result length {} exceeds limit {}",
                body_len, MAX_BODY_LEN
            )));
        }
        if body_len < 12 {
            return Err(GpuWireError::Protocol(format!(
                "result envelope of {} byte(s) is too short",
                body_len
            )));
        }
        let mut body = vec![0u8; body_len as usize];
        read_exact_into(comm, &mut body).await?;

        let exit_code = i32::take(&body[0..4]);
        let elapsed = f64::take(&body[4..12]);
        let output = Buffer::from_body(&body[12..])?;
        Ok(Self {
            exit_code,
            output,
            time_taken: (elapsed >= 0.0).then(|| Duration::from_secs_f64(elapsed)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::duplex_pair;

    #[tokio::test]
    async fn test_envelope_roundtrip() {
        let (mut a, mut b) = duplex_pair(1 << 20);

        let mut output = Buffer::new();
        output.add(43i32);
        let mut result = RoutineResult::ok(output);
        result.attach_time(Duration::from_millis(5));
        result.dump(&mut a).await.unwrap();

        let received = RoutineResult::receive(&mut b).await.unwrap();
        assert!(received.is_success());
        assert_eq!(received.time_taken(), Some(Duration::from_millis(5)));
        let mut out = received.into_output();
        assert_eq!(out.get::<i32>().unwrap(), 43);
    }

    #[tokio::test]
    async fn test_unknown_routine_envelope_is_empty() {
        let (mut a, mut b) = duplex_pair(1 << 20);

        RoutineResult::unknown_routine().dump(&mut a).await.unwrap();

        let received = RoutineResult::receive(&mut b).await.unwrap();
        assert_eq!(received.exit_code(), STATUS_UNKNOWN_ROUTINE);
        assert!(!received.is_success());
        assert!(received.output().is_empty());
        assert_eq!(received.time_taken(), None);
    }

    #[tokio::test]
    async fn test_truncated_envelope_is_protocol_error() {
        let (mut a, mut b) = duplex_pair(1 << 20);

        // Declares a 4-byte body: too short for status + elapsed.
        write_all_into(&mut a, &4u64.to_le_bytes()).await.unwrap();
        write_all_into(&mut a, &[0, 0, 0, 0]).await.unwrap();

        let err = RoutineResult::receive(&mut b).await.unwrap_err();
        assert!(matches!(err, GpuWireError::Protocol(_)));
    }
}
