//! Reader-lease registry: cross-process bookkeeping of active snapshot
//! leases.
//!
//! Readers may live in other OS processes, so this cannot be in-process
//! state: the registry is an explicit service with a start/stop lifecycle,
//! reached over a unix-domain socket with a JSON-line protocol. A client
//! handle is injected into the transaction manager and the compaction
//! engine; there are no ambient singletons.
//!
//! Leases carry heartbeats. A lease whose heartbeat is older than the
//! configured expiry is ignored by `min_epoch` and pruned, so a crashed
//! reader can never pin garbage collection forever. Client calls retry a
//! bounded number of times and then fail fast with `ServiceUnavailable`;
//! garbage collection treats that as "assume everything is pinned".

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::types::{Epoch, Result, TernaError};

/// Default lease expiry when the owner stops heartbeating.
pub const DEFAULT_LEASE_EXPIRY: Duration = Duration::from_secs(30);
/// Default number of connection attempts before giving up.
pub const DEFAULT_CLIENT_RETRIES: u32 = 3;
/// Default pause between connection attempts.
pub const DEFAULT_CLIENT_BACKOFF: Duration = Duration::from_millis(50);

/// One active reader lease.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaseInfo {
    /// Lease id assigned by the service.
    pub lease: u64,
    /// Process id of the reader.
    pub pid: u32,
    /// Epoch the lease pins.
    pub epoch: u64,
    /// Unix-millis timestamp of registration.
    pub started_at_ms: u64,
    /// Unix-millis timestamp of the last heartbeat.
    pub last_heartbeat_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Register { pid: u32, epoch: u64 },
    Heartbeat { lease: u64 },
    Release { lease: u64 },
    MinEpoch,
    List,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Response {
    Registered { lease: u64 },
    Done,
    MinEpoch { epoch: Option<u64> },
    Leases { leases: Vec<LeaseInfo> },
    Error { message: String },
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
struct RegistryState {
    leases: std::collections::HashMap<u64, LeaseInfo>,
    next_lease: u64,
    expiry_ms: u64,
}

impl RegistryState {
    fn new(expiry: Duration) -> Self {
        Self {
            leases: std::collections::HashMap::new(),
            next_lease: 1,
            expiry_ms: expiry.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    fn prune(&mut self, now: u64) {
        let expiry = self.expiry_ms;
        self.leases
            .retain(|_, lease| now.saturating_sub(lease.last_heartbeat_ms) <= expiry);
    }

    fn handle(&mut self, request: Request) -> Response {
        let now = now_ms();
        self.prune(now);
        match request {
            Request::Register { pid, epoch } => {
                let lease = self.next_lease;
                self.next_lease += 1;
                self.leases.insert(
                    lease,
                    LeaseInfo {
                        lease,
                        pid,
                        epoch,
                        started_at_ms: now,
                        last_heartbeat_ms: now,
                    },
                );
                Response::Registered { lease }
            }
            Request::Heartbeat { lease } => match self.leases.get_mut(&lease) {
                Some(info) => {
                    info.last_heartbeat_ms = now;
                    Response::Done
                }
                None => Response::Error {
                    message: format!("unknown lease {lease}"),
                },
            },
            Request::Release { lease } => {
                self.leases.remove(&lease);
                Response::Done
            }
            Request::MinEpoch => Response::MinEpoch {
                epoch: self.leases.values().map(|l| l.epoch).min(),
            },
            Request::List => {
                let mut leases: Vec<LeaseInfo> = self.leases.values().cloned().collect();
                leases.sort_by_key(|l| l.lease);
                Response::Leases { leases }
            }
        }
    }
}

#[cfg(unix)]
mod service_unix {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tracing::{debug, info, warn};

    use super::{Request, Response};
    use crate::types::{Result, TernaError};

    const ACCEPT_POLL: Duration = Duration::from_millis(25);
    const CONN_TIMEOUT: Duration = Duration::from_millis(500);

    /// Lease registry service bound to a unix-domain socket.
    pub struct RegistryService {
        socket_path: PathBuf,
        shutdown: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    }

    impl RegistryService {
        /// Binds the socket and spawns the accept loop.
        pub fn start(socket_path: impl AsRef<Path>, expiry: Duration) -> Result<Self> {
            let socket_path = socket_path.as_ref().to_path_buf();
            match std::fs::remove_file(&socket_path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(TernaError::Io(err)),
            }
            let listener = UnixListener::bind(&socket_path).map_err(TernaError::from)?;
            listener.set_nonblocking(true).map_err(TernaError::from)?;
            let shutdown = Arc::new(AtomicBool::new(false));
            let state = Arc::new(Mutex::new(super::RegistryState::new(expiry)));
            let flag = Arc::clone(&shutdown);
            let handle = std::thread::spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            if let Err(err) = handle_connection(stream, &state) {
                                debug!(error = %err, "registry.serve.connection_error");
                            }
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            std::thread::sleep(ACCEPT_POLL);
                        }
                        Err(err) => {
                            warn!(error = %err, "registry.serve.accept_error");
                            std::thread::sleep(ACCEPT_POLL);
                        }
                    }
                }
            });
            info!(socket = %socket_path.display(), "registry.serve.start");
            Ok(Self {
                socket_path,
                shutdown,
                handle: Some(handle),
            })
        }

        /// Socket path clients connect to.
        pub fn socket_path(&self) -> &Path {
            &self.socket_path
        }

        /// Stops the accept loop and removes the socket file.
        pub fn stop(&mut self) {
            self.shutdown.store(true, Ordering::Relaxed);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            let _ = std::fs::remove_file(&self.socket_path);
            info!(socket = %self.socket_path.display(), "registry.serve.stop");
        }
    }

    impl Drop for RegistryService {
        fn drop(&mut self) {
            if self.handle.is_some() {
                self.stop();
            }
        }
    }

    fn handle_connection(
        stream: UnixStream,
        state: &Mutex<super::RegistryState>,
    ) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(CONN_TIMEOUT))?;
        stream.set_write_timeout(Some(CONN_TIMEOUT))?;
        let mut writer = stream.try_clone()?;
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => state.lock().handle(request),
                Err(err) => Response::Error {
                    message: format!("malformed request: {err}"),
                },
            };
            let mut payload = serde_json::to_string(&response)
                .unwrap_or_else(|_| "{\"kind\":\"error\",\"message\":\"encode\"}".to_string());
            payload.push('\n');
            writer.write_all(payload.as_bytes())?;
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(unix)]
pub use service_unix::RegistryService;

#[cfg(not(unix))]
mod service_stub {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use crate::types::{Result, TernaError};

    /// Lease registry service; unavailable on platforms without unix-domain
    /// sockets, which drives writers into conservative GC mode.
    pub struct RegistryService {
        socket_path: PathBuf,
    }

    impl RegistryService {
        /// Always fails on this platform.
        pub fn start(socket_path: impl AsRef<Path>, _expiry: Duration) -> Result<Self> {
            let _ = socket_path.as_ref();
            Err(TernaError::Invalid(
                "reader registry requires unix domain sockets",
            ))
        }

        /// Socket path clients would connect to.
        pub fn socket_path(&self) -> &Path {
            &self.socket_path
        }

        /// No-op.
        pub fn stop(&mut self) {}
    }
}

#[cfg(not(unix))]
pub use service_stub::RegistryService;

/// Client handle for the lease registry.
#[derive(Clone, Debug)]
pub struct RegistryClient {
    socket_path: PathBuf,
    retries: u32,
    backoff: Duration,
}

impl RegistryClient {
    /// Builds a client for the service at `socket_path`.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            retries: DEFAULT_CLIENT_RETRIES,
            backoff: DEFAULT_CLIENT_BACKOFF,
        }
    }

    /// Overrides the retry budget.
    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries.max(1);
        self.backoff = backoff;
        self
    }

    /// Socket path this client targets.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Registers a lease pinning `epoch` for `pid`.
    pub fn register(&self, pid: u32, epoch: Epoch) -> Result<u64> {
        match self.call(&Request::Register { pid, epoch: epoch.0 })? {
            Response::Registered { lease } => Ok(lease),
            other => Err(unexpected(other)),
        }
    }

    /// Refreshes a lease's heartbeat.
    pub fn heartbeat(&self, lease: u64) -> Result<()> {
        match self.call(&Request::Heartbeat { lease })? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Releases a lease.
    pub fn release(&self, lease: u64) -> Result<()> {
        match self.call(&Request::Release { lease })? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Smallest epoch pinned by any live lease, or `None` when no leases are
    /// held.
    pub fn min_epoch(&self) -> Result<Option<Epoch>> {
        match self.call(&Request::MinEpoch)? {
            Response::MinEpoch { epoch } => Ok(epoch.map(Epoch)),
            other => Err(unexpected(other)),
        }
    }

    /// Snapshot of all live leases.
    pub fn leases(&self) -> Result<Vec<LeaseInfo>> {
        match self.call(&Request::List)? {
            Response::Leases { leases } => Ok(leases),
            other => Err(unexpected(other)),
        }
    }

    fn call(&self, request: &Request) -> Result<Response> {
        let payload = serde_json::to_string(request)
            .map_err(|_| TernaError::Invalid("registry request failed to serialize"))?;
        let mut attempt = 0u32;
        loop {
            match self.exchange(&payload) {
                Ok(Response::Error { message }) => {
                    return Err(TernaError::InvalidOwned(message));
                }
                Ok(response) => return Ok(response),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.retries {
                        tracing::warn!(
                            socket = %self.socket_path.display(),
                            attempts = attempt,
                            error = %err,
                            "registry.client.unavailable"
                        );
                        return Err(TernaError::ServiceUnavailable);
                    }
                    std::thread::sleep(self.backoff);
                }
            }
        }
    }

    #[cfg(unix)]
    fn exchange(&self, payload: &str) -> std::io::Result<Response> {
        use std::io::{BufRead, BufReader, Write};
        use std::os::unix::net::UnixStream;

        let mut stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(Duration::from_millis(500)))?;
        stream.set_write_timeout(Some(Duration::from_millis(500)))?;
        stream.write_all(payload.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        serde_json::from_str(&line).map_err(|err| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
        })
    }

    #[cfg(not(unix))]
    fn exchange(&self, _payload: &str) -> std::io::Result<Response> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "unix domain sockets unavailable",
        ))
    }
}

fn unexpected(response: Response) -> TernaError {
    TernaError::InvalidOwned(format!("unexpected registry response: {response:?}"))
}

/// RAII guard releasing a lease on every exit path.
#[derive(Debug)]
pub struct LeaseGuard {
    client: RegistryClient,
    lease: u64,
    released: bool,
}

impl LeaseGuard {
    /// Wraps a registered lease.
    pub fn new(client: RegistryClient, lease: u64) -> Self {
        Self {
            client,
            lease,
            released: false,
        }
    }

    /// Lease id held by this guard.
    pub fn lease_id(&self) -> u64 {
        self.lease
    }

    /// Refreshes the lease's heartbeat.
    pub fn heartbeat(&self) -> Result<()> {
        self.client.heartbeat(self.lease)
    }

    /// Explicitly releases, surfacing any transport error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.client.release(self.lease)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.client.release(self.lease);
        }
    }
}
