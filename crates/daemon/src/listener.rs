//! The thread-per-connection accept loop and the
//! cooperative-cancellation wrapper in-flight sessions observe at their
//! suspension points.
//!
//! Concurrency is bounded by a counting semaphore sized from `--threads`:
//! the accept loop blocks on a permit before
//! spawning each connection's thread, so a saturated daemon simply stops
//! accepting rather than growing an unbounded thread count.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use protocol::channel::{DuplexChannel, Readable, TcpChannel, Writable};
use protocol::ChannelError;

use crate::error::DaemonError;
use crate::modules::Modules;
use crate::session::{self, SessionConfig};

/// How long the accept loop sleeps between polls of a non-blocking listener
/// while waiting for either a connection or a cancellation request.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared flag an accept loop and every session it spawned observe to
/// cooperate on shutdown. Setting it to `true` stops the
/// accept loop from taking new connections and causes in-flight
/// interruptible sessions to fail their next read or write.
pub type CancelToken = Arc<AtomicBool>;

/// Settings for one [`serve`] invocation.
pub struct ListenerConfig {
    /// Local address to bind and listen on.
    pub address: SocketAddr,
    /// Maximum number of connections handled concurrently; the accept loop
    /// blocks rather than spawning beyond this (`--threads`).
    pub max_connections: usize,
    /// Per-operation read/write timeout; `Duration::ZERO` means no timeout.
    pub timeout: Duration,
    /// Session-level settings applied to every accepted connection.
    pub session: SessionConfig,
}

/// Runs the accept loop until `cancel` is set, dispatching each connection
/// to its own thread.
///
/// # Errors
///
/// Returns an [`io::Error`] if the listening socket cannot be bound, or if
/// `accept` fails with anything other than `WouldBlock`.
pub fn serve(config: ListenerConfig, modules: Arc<Modules>, cancel: CancelToken) -> io::Result<()> {
    let listener = bind_listener(config.address)?;
    let semaphore = Arc::new(Semaphore::new(config.max_connections.max(1)));
    let mut handles = Vec::new();

    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let (stream, _peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
            Err(err) => return Err(err),
        };

        let permit = semaphore.clone().acquire();
        let modules = Arc::clone(&modules);
        let cancel = Arc::clone(&cancel);
        let timeout = config.timeout;
        let session_config = config.session.clone();

        let handle = thread::spawn(move || {
            let _permit = permit;
            if let Err(_err) = handle_connection(stream, &modules, &session_config, timeout, &cancel) {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "session ended with an error");
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn bind_listener(address: SocketAddr) -> io::Result<TcpListener> {
    let domain = if address.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(address))?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

fn handle_connection(
    stream: TcpStream,
    modules: &Modules,
    session_config: &SessionConfig,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<(), DaemonError> {
    if !timeout.is_zero() {
        stream.set_read_timeout(Some(timeout)).map_err(ChannelError::from)?;
        stream.set_write_timeout(Some(timeout)).map_err(ChannelError::from)?;
    }
    let channel = TcpChannel::from_tcp_stream(stream).map_err(ChannelError::from)?;

    if session_config.interruptible {
        let channel = InterruptibleChannel::new(channel, Arc::clone(cancel));
        session::run(channel, modules, session_config)?;
    } else {
        session::run(channel, modules, session_config)?;
    }
    Ok(())
}

/// Decorates a [`DuplexChannel`] so every read or write fails cooperatively
/// once `cancel` is set, rather than blocking through a shutdown request.
/// This is a best-effort mechanism: a read or write
/// already in progress on the underlying transport still has to return
/// before the next check runs.
pub struct InterruptibleChannel<C> {
    inner: C,
    cancel: CancelToken,
}

impl<C> InterruptibleChannel<C> {
    /// Wraps `inner`, failing its reads and writes once `cancel` is set.
    #[must_use]
    pub fn new(inner: C, cancel: CancelToken) -> Self {
        Self { inner, cancel }
    }

    fn check_cancelled(&self) -> Result<(), ChannelError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(ChannelError::Io(io::Error::new(io::ErrorKind::Interrupted, "session cancelled")))
        } else {
            Ok(())
        }
    }
}

impl<C: Readable> Readable for InterruptibleChannel<C> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
        self.check_cancelled()?;
        self.inner.read_bytes(buf)
    }
}

impl<C: Writable> Writable for InterruptibleChannel<C> {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        self.check_cancelled()?;
        self.inner.write_bytes(buf)
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        self.inner.flush()
    }
}

impl<C: DuplexChannel> DuplexChannel for InterruptibleChannel<C> {
    fn peer_address(&self) -> Option<SocketAddr> {
        self.inner.peer_address()
    }

    fn peer_principal(&self) -> Option<&str> {
        self.inner.peer_principal()
    }
}

/// A counting semaphore bounding concurrent connections to `--threads`.
struct Semaphore {
    available: Mutex<usize>,
    condvar: Condvar,
    waiters: AtomicUsize,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self { available: Mutex::new(permits), condvar: Condvar::new(), waiters: AtomicUsize::new(0) }
    }

    fn acquire(self: Arc<Self>) -> SemaphorePermit {
        self.waiters.fetch_add(1, Ordering::Relaxed);
        let mut available = self.available.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while *available == 0 {
            available = self.condvar.wait(available).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *available -= 1;
        self.waiters.fetch_sub(1, Ordering::Relaxed);
        drop(available);
        SemaphorePermit { semaphore: Arc::clone(&self) }
    }

    fn release(&self) {
        let mut available = self.available.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *available += 1;
        self.condvar.notify_one();
    }
}

struct SemaphorePermit {
    semaphore: Arc<Semaphore>,
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FakeDuplex {
        input: Cursor<Vec<u8>>,
    }

    impl Readable for FakeDuplex {
        fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
            use std::io::Read;
            self.input.read_exact(buf).map_err(|_| ChannelError::PrematureEof)
        }
    }

    impl Writable for FakeDuplex {
        fn write_bytes(&mut self, _buf: &[u8]) -> Result<(), ChannelError> {
            Ok(())
        }

        fn flush(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    impl DuplexChannel for FakeDuplex {
        fn peer_address(&self) -> Option<SocketAddr> {
            None
        }
    }

    #[test]
    fn interruptible_channel_passes_through_until_cancelled() {
        let cancel: CancelToken = Arc::new(AtomicBool::new(false));
        let inner = FakeDuplex { input: Cursor::new(vec![1, 2, 3, 4]) };
        let mut channel = InterruptibleChannel::new(inner, Arc::clone(&cancel));

        let mut buf = [0u8; 2];
        channel.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);

        cancel.store(true, Ordering::Relaxed);
        let err = channel.read_bytes(&mut buf).unwrap_err();
        assert!(matches!(err, ChannelError::Io(_)));
    }

    #[test]
    fn semaphore_blocks_beyond_its_permit_count() {
        let semaphore = Arc::new(Semaphore::new(1));
        let first = Arc::clone(&semaphore).acquire();

        let waiting = Arc::new(AtomicBool::new(false));
        let waiting_clone = Arc::clone(&waiting);
        let semaphore_clone = Arc::clone(&semaphore);
        let handle = thread::spawn(move || {
            waiting_clone.store(true, Ordering::SeqCst);
            let _second = semaphore_clone.acquire();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(waiting.load(Ordering::SeqCst));

        drop(first);
        handle.join().unwrap();
    }
}
