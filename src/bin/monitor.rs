// ============================================================================
// Occupancy Monitor HTTP Server - Detector Entry Point
// ============================================================================
//
// Watches the established-connection population on a monitored port and
// serves the resulting verdict over HTTP. Clients ask "what is the current
// verdict?" and receive NORMAL or UNDER_ATTACK plus the numbers behind it;
// what a caller does with that verdict is its own business.
//
// Architecture:
// - Main thread: listen for HTTP connections
// - Worker threads: handle requests in parallel (thread pool)
// - Shared state: OccupancyMonitor behind an Arc; the attack window inside
//   it is mutex-guarded so concurrent requests evaluate atomically
//
// ============================================================================

use std::env;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;
use threadpool::ThreadPool;

use loris::occupancy::{
    DEFAULT_DWELL_SECS, DEFAULT_MONITORED_PORT, DEFAULT_THRESHOLD, MonitorConfig, OccupancyMonitor,
};
use loris::list_established_to_port;

/// Default port the verdict server itself listens on.
const DEFAULT_LISTEN_PORT: u16 = 8888;

// ============================================================================
// HTTP PLUMBING
// ============================================================================

/// Write a JSON body with the standard header set.
fn send_json(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
}

/// Handle a single HTTP client connection.
///
/// Reads the request, routes to the matching endpoint, sends a JSON
/// response. Runs in a worker thread from the thread pool.
fn handle_client(mut stream: TcpStream, monitor: Arc<OccupancyMonitor>) {
    let mut buffer = [0_u8; 4096];

    if let Ok(bytes_read) = stream.read(&mut buffer) {
        let request = String::from_utf8_lossy(&buffer[..bytes_read]);

        if request.starts_with("GET /status") {
            // ================================================================
            // GET /status - Sample, evaluate, report the verdict
            // ================================================================
            match monitor.check() {
                Ok(report) => {
                    let body = serde_json::to_string_pretty(&report).unwrap();
                    send_json(&mut stream, "200 OK", &body);
                }
                Err(e) => {
                    // Sampling failure is a distinct outcome, never a count
                    // of zero; the attack window was left untouched
                    let body = serde_json::json!({ "error": e }).to_string();
                    send_json(&mut stream, "500 Internal Server Error", &body);
                }
            }
        } else if request.starts_with("GET /connections") {
            // ================================================================
            // GET /connections - Diagnostic listing (capped)
            // ================================================================
            match list_established_to_port(monitor.config().monitored_port) {
                Ok(records) => {
                    let body = serde_json::to_string_pretty(&records).unwrap();
                    send_json(&mut stream, "200 OK", &body);
                }
                Err(e) => {
                    let body = serde_json::json!({ "error": e }).to_string();
                    send_json(&mut stream, "500 Internal Server Error", &body);
                }
            }
        } else if request.starts_with("GET /health") {
            // ================================================================
            // GET /health - Liveness probe for load balancers
            // ================================================================
            let health_response = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n\
                 {\"status\": \"ok\"}\n";
            let _ = stream.write_all(health_response.as_bytes());
        } else if request.starts_with("GET /config") {
            // ================================================================
            // GET /config - The startup-fixed configuration
            // ================================================================
            let body = serde_json::to_string_pretty(monitor.config()).unwrap();
            send_json(&mut stream, "200 OK", &body);
        } else {
            // ================================================================
            // Unknown endpoint
            // ================================================================
            let not_found = "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n\
                 Not Found\n";
            let _ = stream.write_all(not_found.as_bytes());
        }
    }
    // Socket closes when stream is dropped (RAII)
}

// ============================================================================
// CLI PARSING
// ============================================================================

fn usage(program: &str) {
    eprintln!(
        "Usage: {program} [-p <monitored-port>] [-t <threshold>] [-d <dwell-seconds>] [-l <listen-port>]"
    );
    eprintln!("Defaults: -p {DEFAULT_MONITORED_PORT} -t {DEFAULT_THRESHOLD} -d {DEFAULT_DWELL_SECS} -l {DEFAULT_LISTEN_PORT}");
}

fn parse_flag_value<'a, T, I>(iter: &mut I, flag: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    I: Iterator<Item = &'a String>,
{
    let value = iter
        .next()
        .ok_or_else(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .map_err(|e| format!("Invalid value for {flag}: {e}"))
}

fn parse_args(args: &[String]) -> Result<(MonitorConfig, u16), String> {
    let mut config = MonitorConfig {
        monitored_port: DEFAULT_MONITORED_PORT,
        threshold: DEFAULT_THRESHOLD,
        dwell_secs: DEFAULT_DWELL_SECS,
    };
    let mut listen_port = DEFAULT_LISTEN_PORT;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-p" | "--port" => config.monitored_port = parse_flag_value(&mut iter, arg)?,
            "-t" | "--threshold" => config.threshold = parse_flag_value(&mut iter, arg)?,
            "-d" | "--dwell" => config.dwell_secs = parse_flag_value(&mut iter, arg)?,
            "-l" | "--listen" => listen_port = parse_flag_value(&mut iter, arg)?,
            other => return Err(format!("Unknown argument: {other}")),
        }
    }

    config.validate()?;
    if listen_port == 0 {
        return Err("Listen port must be non-zero".to_owned());
    }

    Ok((config, listen_port))
}

// ============================================================================
// MAIN FUNCTION - Server Startup and Event Loop
// ============================================================================

/// Start the verdict server.
///
/// Initializes the thread pool, binds the listening port, and runs the main
/// accept loop that dispatches requests to worker threads. Handles graceful
/// shutdown on ctrl-c.
fn main() {
    let argv: Vec<String> = env::args().collect();
    let program = argv.first().map_or("monitor", String::as_str);

    // Configuration errors are fatal before any sampling begins
    let (config, listen_port) = match parse_args(&argv[1..]) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("ERROR: {e}");
            usage(program);
            process::exit(1);
        }
    };

    let monitor = match OccupancyMonitor::with_proc_counter(config.clone()) {
        Ok(monitor) => Arc::new(monitor),
        Err(e) => {
            eprintln!("ERROR: {e}");
            process::exit(1);
        }
    };

    // Size thread pool for I/O-bound request handling
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(4);
    let thread_count = (cpu_count * 2).clamp(4, 16);

    let pool = ThreadPool::new(thread_count);

    let listener =
        TcpListener::bind(format!("127.0.0.1:{listen_port}")).expect("Failed to bind to address");

    println!("Occupancy Monitor - Verdict Server");
    println!("==================================");
    println!("Listening on:     127.0.0.1:{listen_port}");
    println!("Monitored port:   {}", config.monitored_port);
    println!("Threshold:        > {} established connections", config.threshold);
    println!("Dwell time:       {} seconds", config.dwell_secs);
    println!("\nEndpoints:");
    println!("  GET http://127.0.0.1:{listen_port}/status      - Sample and return the verdict");
    println!("  GET http://127.0.0.1:{listen_port}/connections - List current connections (capped)");
    println!("  GET http://127.0.0.1:{listen_port}/health      - Liveness probe");
    println!("  GET http://127.0.0.1:{listen_port}/config      - Show configuration");
    println!("\nPress Ctrl+C to stop\n");

    // Shutdown flag flipped by the ctrl-c handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, AtomicOrdering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    // Non-blocking accepts so the shutdown flag is checked periodically
    listener
        .set_nonblocking(true)
        .expect("Cannot set non-blocking");

    let mut last_status = Instant::now();

    // ========================================================================
    // MAIN SERVER LOOP
    // ========================================================================
    while running.load(AtomicOrdering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let monitor_clone = Arc::clone(&monitor);
                pool.execute(move || {
                    handle_client(stream, monitor_clone);
                });
            }

            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // No connection pending; emit a periodic status line
                if last_status.elapsed().as_secs() >= 60 {
                    match monitor.check() {
                        Ok(report) => eprintln!(
                            "[status] {} established on port {} -> {:?}",
                            report.established, report.port, report.verdict
                        ),
                        Err(e) => eprintln!("[status] Sampling failed: {e}"),
                    }
                    last_status = Instant::now();
                }

                // 100ms is acceptable accept latency for this use case
                std::thread::sleep(core::time::Duration::from_millis(100));
            }

            Err(e) => eprintln!("Error accepting connection: {e}"),
        }
    }

    // Let in-progress requests finish before exiting
    pool.join();
    println!("\nShutting down...");
}
