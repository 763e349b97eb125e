//! Frontend call builder - the client-side mirror of the protocol.
//!
//! Each call is three phases: [`Frontend::prepare`] starts a fresh
//! outgoing buffer, the `add_*` methods stage arguments in the routine's
//! fixed order, and [`Frontend::execute`] ships the call and decodes the
//! result.
//!
//! The protocol's one load-bearing convention: outputs are read back in
//! exactly the order the backend handler wrote them. Nothing checks this
//! at runtime - the per-routine staging code on both sides guarantees it.
//!
//! ```ignore
//! let mut frontend = Frontend::connect(&endpoint).await?;
//! frontend.prepare();
//! frontend.add_variable(42i32);
//! frontend.execute("ping").await?;
//! if frontend.success() {
//!     let echoed: i32 = frontend.get_output_variable()?;
//! }
//! ```

use std::time::Duration;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{GpuWireError, Result};
use crate::protocol::{Buffer, RemoteHandle, RoutineResult, Scalar, STATUS_OK};
use crate::transport::{write_all_into, Communicator};

/// Client-side call builder over one connected communicator.
///
/// Calls on one frontend are strictly serialized; a process wanting
/// parallel calls opens parallel frontends.
pub struct Frontend {
    communicator: Box<dyn Communicator>,
    input: Buffer,
    output: Buffer,
    exit_code: i32,
    time_taken: Option<Duration>,
}

impl Frontend {
    /// Build the endpoint's communicator and connect it.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let mut communicator = endpoint.build()?;
        communicator.connect().await?;
        Ok(Self::from_communicator(communicator))
    }

    /// Wrap an already-connected communicator.
    pub fn from_communicator(communicator: Box<dyn Communicator>) -> Self {
        Self {
            communicator,
            input: Buffer::new(),
            output: Buffer::new(),
            exit_code: STATUS_OK,
            time_taken: None,
        }
    }

    /// Start a fresh call: new outgoing buffer, previous outputs cleared.
    pub fn prepare(&mut self) {
        self.input = Buffer::new();
        self.output = Buffer::new();
        self.exit_code = STATUS_OK;
        self.time_taken = None;
    }

    /// Stage one scalar argument.
    pub fn add_variable<T: Scalar>(&mut self, value: T) {
        self.input.add(value);
    }

    /// Stage a host-memory block as a count-prefixed scalar run.
    pub fn add_host_slice<T: Scalar>(&mut self, values: &[T]) {
        self.input.add_slice(values);
    }

    /// Stage a device-resource identity in the marshal table.
    pub fn add_device_handle(&mut self, handle: RemoteHandle) {
        self.input.add_marshal(handle);
    }

    /// Ship the staged call and block for its result.
    ///
    /// Writes the NUL-terminated routine name, opens the per-call channel
    /// bracket, dumps the argument buffer, decodes the result envelope,
    /// closes the bracket.
    pub async fn execute(&mut self, routine: &str) -> Result<()> {
        if routine.is_empty() || routine.as_bytes().contains(&0) {
            return Err(GpuWireError::Protocol(format!(
                "invalid routine name {routine:?}"
            )));
        }
        write_all_into(self.communicator.as_mut(), routine.as_bytes()).await?;
        write_all_into(self.communicator.as_mut(), &[0]).await?;

        self.communicator.begin_call(routine).await?;
        self.input.dump(self.communicator.as_mut()).await?;
        let result = RoutineResult::receive(self.communicator.as_mut()).await?;
        self.communicator.end_call();

        self.exit_code = result.exit_code();
        self.time_taken = result.time_taken();
        debug!(
            %routine,
            exit_code = self.exit_code,
            time_taken = ?self.time_taken,
            "call completed"
        );
        self.output = result.into_output();
        Ok(())
    }

    /// Did the last call report success?
    pub fn success(&self) -> bool {
        self.exit_code == STATUS_OK
    }

    /// Status code of the last call.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Backend-side wall-clock time of the last call.
    pub fn time_taken(&self) -> Option<Duration> {
        self.time_taken
    }

    /// Read the next output scalar, in backend write order.
    pub fn get_output_variable<T: Scalar>(&mut self) -> Result<T> {
        self.output.get()
    }

    /// Read the next count-prefixed output run.
    pub fn get_output_vec<T: Scalar>(&mut self) -> Result<Vec<T>> {
        self.output.get_vec()
    }

    /// Read the next output device-resource identity.
    pub fn get_output_handle(&mut self) -> Result<RemoteHandle> {
        self.output.get_marshal()
    }

    /// Close the underlying connection.
    pub async fn close(&mut self) -> Result<()> {
        self.communicator.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::duplex_pair;

    #[tokio::test]
    async fn test_rejects_invalid_routine_names() {
        let (near, _far) = duplex_pair(1024);
        let mut frontend = Frontend::from_communicator(Box::new(near));

        frontend.prepare();
        assert!(matches!(
            frontend.execute("").await,
            Err(GpuWireError::Protocol(_))
        ));
        assert!(matches!(
            frontend.execute("bad\0name").await,
            Err(GpuWireError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_against_scripted_peer() {
        let (near, mut far) = duplex_pair(1 << 20);
        let mut frontend = Frontend::from_communicator(Box::new(near));

        let peer = tokio::spawn(async move {
            let name = crate::transport::read_routine_name(&mut far)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(name, "ping");
            let mut input = Buffer::new();
            input.reset(&mut far).await.unwrap();
            let value = input.get::<i32>().unwrap();

            let mut output = Buffer::new();
            output.add(value + 1);
            output.add_marshal(RemoteHandle::from_raw(0x51));
            let result = RoutineResult::ok(output);
            result.dump(&mut far).await.unwrap();
            far
        });

        frontend.prepare();
        frontend.add_variable(42i32);
        frontend.execute("ping").await.unwrap();

        assert!(frontend.success());
        assert_eq!(frontend.get_output_variable::<i32>().unwrap(), 43);
        assert_eq!(frontend.get_output_handle().unwrap().raw(), 0x51);
        // Reading past what the handler wrote is an underrun, not junk.
        assert!(frontend.get_output_variable::<i32>().is_err());
        peer.await.unwrap();
    }
}
