//! Backend process - the accept loop and per-connection dispatch.
//!
//! A [`Process`] owns its listening communicator and the loaded handler
//! set for the process's lifetime. The accept loop races each accept
//! against a shutdown flag; every admitted connection runs in its own
//! spawned worker, serialized within the connection, sharing nothing with
//! other workers beyond the read-only registry.
//!
//! Admission is bounded: `max_connections` semaphore permits, with peers
//! beyond capacity closed and logged rather than queued.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::handler::HandlerRegistry;
use crate::protocol::{Buffer, RoutineResult};
use crate::transport::{read_routine_name, Communicator};

/// Default bound on concurrently served connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Raises the cooperative shutdown flag of a [`Process`].
///
/// The flag is observed between accept cycles: new connections stop,
/// in-flight workers run to completion.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Request graceful termination of the accept loop.
    pub fn shutdown(&self) {
        let _ = self.flag.send(true);
    }
}

/// One backend instance: listening communicator plus loaded handlers.
pub struct Process {
    communicator: Box<dyn Communicator>,
    registry: Arc<HandlerRegistry>,
    max_connections: usize,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Process {
    /// Create a process around an unbound communicator and a loaded
    /// registry.
    pub fn new(communicator: Box<dyn Communicator>, registry: HandlerRegistry) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            communicator,
            registry: Arc::new(registry),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Override the admission bound.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Handle for raising the shutdown flag, e.g. from a signal task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown_tx.clone(),
        }
    }

    /// Bind and listen.
    pub async fn serve(&mut self) -> Result<()> {
        self.communicator.serve().await
    }

    /// Local address of the listening communicator, after [`Process::serve`].
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.communicator.bound_addr()
    }

    /// Serve then run the accept loop until shutdown or a transport
    /// failure.
    pub async fn start(&mut self) -> Result<()> {
        self.serve().await?;
        self.run().await
    }

    /// The accept loop. Expects [`Process::serve`] to have succeeded.
    ///
    /// A `None` accept means "no new connection, poll again"; the raised
    /// shutdown flag terminates the loop; a transport error aborts it.
    pub async fn run(&mut self) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.max_connections));
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.communicator.accept() => {
                    let peer = match accepted {
                        Ok(Some(peer)) => peer,
                        Ok(None) => continue,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            return Err(e);
                        }
                    };
                    match permits.clone().try_acquire_owned() {
                        Ok(permit) => {
                            let registry = Arc::clone(&self.registry);
                            tokio::spawn(async move {
                                let _permit = permit;
                                serve_connection(peer, registry).await;
                            });
                        }
                        Err(_) => {
                            warn!(
                                limit = self.max_connections,
                                "connection limit reached, rejecting peer"
                            );
                            let mut peer = peer;
                            let _ = peer.close().await;
                        }
                    }
                }
            }
        }
        debug!("accept loop terminated");
        Ok(())
    }
}

/// Serve one connection until the peer closes or the framing desyncs.
async fn serve_connection(mut comm: Box<dyn Communicator>, registry: Arc<HandlerRegistry>) {
    let mut input = Buffer::new();
    loop {
        let routine = match read_routine_name(comm.as_mut()).await {
            Ok(Some(routine)) => routine,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "routine name read failed, closing connection");
                break;
            }
        };
        debug!(routine = %routine, "received routine");

        // Channel bracket first: on hybrid this selects and primes the
        // channel the payload arrives on; elsewhere it is a no-op.
        if let Err(e) = comm.begin_call(&routine).await {
            warn!(routine = %routine, error = %e, "call bracket failed, closing connection");
            break;
        }
        if let Err(e) = input.reset(comm.as_mut()).await {
            warn!(routine = %routine, error = %e, "framing desync, closing connection");
            break;
        }

        let result = match registry.find(&routine) {
            None => {
                error!(routine = %routine, "requested unknown routine");
                RoutineResult::unknown_routine()
            }
            Some(handler) => {
                let started = Instant::now();
                let mut result = handler.execute(&routine, &mut input);
                result.attach_time(started.elapsed());
                result
            }
        };

        if let Err(e) = result.dump(comm.as_mut()).await {
            warn!(routine = %routine, error = %e, "result dump failed, closing connection");
            break;
        }
        comm.end_call();
        debug!(
            routine = %routine,
            exit_code = result.exit_code(),
            time_taken = ?result.time_taken(),
            "routine returned"
        );
    }
    let _ = comm.close().await;
    debug!("connection worker finished");
}
