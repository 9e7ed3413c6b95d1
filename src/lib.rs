// ============================================================================
// LORIS LIBRARY
// ============================================================================
// Paired attacker/detector for slow-connection (connection-exhaustion)
// denial-of-service conditions:
//
// 1. ConnectionFlooder (src/flooder.rs): holds a pool of partially-complete
//    HTTP connections open against a target, sending periodic no-op header
//    fragments so the server never stops waiting for the request to finish.
// 2. OccupancyMonitor (src/occupancy.rs): samples the established-connection
//    count on a monitored port from the kernel TCP table and applies a
//    threshold-and-dwell rule before confirming an attack.
//
// This file holds the shared kernel-table layer: parsing /proc/net/tcp and
// /proc/net/tcp6 into counts and connection records. Both are pseudo-files
// provided by the Linux kernel; reading them is the only way this crate
// observes the environment.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

// === MODULE DECLARATIONS ===
pub mod flooder;
pub mod occupancy;

pub use flooder::{Flooder, FlooderConfig};
pub use occupancy::{
    AttackWindow, ConnectionCounter, MonitorConfig, OccupancyMonitor, ProcTcpCounter,
    StatusReport, Verdict,
};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Maximum connection records returned by a single listing query.
///
/// A port under attack can have thousands of table rows; diagnostic listings
/// are capped so a response stays bounded while the count (which is what the
/// detector actually uses) remains exact.
pub const MAX_LISTED_CONNECTIONS: usize = 100;

// ============================================================================
// TCP STATE CONSTANTS
// ============================================================================
// These match the values used by the Linux kernel in /proc/net/tcp.
// Hexadecimal to mirror the kernel definitions exactly.

pub const TCP_ESTABLISHED: u8 = 0x01; // Active connection, data flowing
pub const TCP_SYN_SENT: u8 = 0x02; // Client sent connection request
pub const TCP_SYN_RECV: u8 = 0x03; // Server received connection request
pub const TCP_FIN_WAIT1: u8 = 0x04; // Closing connection (stage 1)
pub const TCP_FIN_WAIT2: u8 = 0x05; // Closing connection (stage 2)
pub const TCP_TIME_WAIT: u8 = 0x06; // Waiting for network to clear old packets
pub const TCP_CLOSE: u8 = 0x07; // Connection closed
pub const TCP_CLOSE_WAIT: u8 = 0x08; // Remote side closed, waiting for local close
pub const TCP_LAST_ACK: u8 = 0x09; // Waiting for final acknowledgment
pub const TCP_LISTEN: u8 = 0x0A; // Listening for incoming connections
pub const TCP_CLOSING: u8 = 0x0B; // Both sides closing simultaneously

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// One row of the kernel TCP table, scoped to what the detector reports.
///
/// All fields use owned types because records outlive the borrowed table
/// lines they were parsed from; they are serialized directly into HTTP
/// response bodies.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectionRecord {
    pub local_address: String,  // e.g., "127.0.0.1:8080"
    pub remote_address: String, // e.g., "10.0.0.7:51234"
    pub state: String,          // Human-readable: "ESTABLISHED", "TIME_WAIT", ...
    pub state_code: u8,         // Numeric kernel state code (0x01, 0x06, ...)
}

// ============================================================================
// TCP STATE NAMES
// ============================================================================

/// Map a kernel TCP state code to its conventional name.
#[inline]
#[must_use]
pub fn get_tcp_state_name(state: u8) -> &'static str {
    match state {
        TCP_ESTABLISHED => "ESTABLISHED",
        TCP_SYN_SENT => "SYN_SENT",
        TCP_SYN_RECV => "SYN_RECV",
        TCP_FIN_WAIT1 => "FIN_WAIT1",
        TCP_FIN_WAIT2 => "FIN_WAIT2",
        TCP_TIME_WAIT => "TIME_WAIT",
        TCP_CLOSE => "CLOSE",
        TCP_CLOSE_WAIT => "CLOSE_WAIT",
        TCP_LAST_ACK => "LAST_ACK",
        TCP_LISTEN => "LISTEN",
        TCP_CLOSING => "CLOSING",
        _ => "UNKNOWN",
    }
}

// ============================================================================
// ADDRESS PARSING
// ============================================================================

/// Parse a hexadecimal IPv4 address from /proc/net/tcp.
///
/// === FORMAT ===
/// The kernel stores IPv4 addresses as a 32-bit little-endian hex value.
/// Example: "0100007F" is 127.0.0.1 (bytes reversed: 7F 00 00 01).
///
/// Inlined: called in tight loops when parsing the table.
#[inline]
fn parse_hex_ipv4(hex_str: &str) -> Result<Ipv4Addr, String> {
    let ip_u32 =
        u32::from_str_radix(hex_str, 16).map_err(|e| format!("Failed to parse hex IP: {e}"))?;

    // Little-endian: the lowest byte is the first octet
    Ok(Ipv4Addr::from(ip_u32.to_le_bytes()))
}

/// Parse a hexadecimal IPv6 address from /proc/net/tcp6.
///
/// === FORMAT ===
/// 32 hex characters: four 32-bit groups, each group little-endian within
/// itself. Example: "0000000000000000FFFF00000100007F" is ::ffff:127.0.0.1.
#[inline]
fn parse_hex_ipv6(hex_str: &str) -> Result<Ipv6Addr, String> {
    if hex_str.len() != 32 {
        return Err(format!(
            "Invalid IPv6 hex length: expected 32 characters, got {}",
            hex_str.len()
        ));
    }

    let mut bytes = [0_u8; 16];
    for (i, chunk) in hex_str.as_bytes().chunks(8).enumerate() {
        // A chunk of a 32-char hex field is always valid ASCII
        let group_str =
            std::str::from_utf8(chunk).map_err(|_| "Non-ASCII IPv6 hex field".to_owned())?;
        let group = u32::from_str_radix(group_str, 16)
            .map_err(|e| format!("Failed to parse hex IPv6 group: {e}"))?;
        bytes[i * 4..i * 4 + 4].copy_from_slice(&group.to_le_bytes());
    }

    Ok(Ipv6Addr::from(bytes))
}

/// Parse an address field from /proc/net/tcp[6] format (hex_ip:hex_port).
///
/// The address family is inferred from the hex length: 8 characters for
/// IPv4, 32 for IPv6. Uses `split_once()` instead of a Vec allocation.
#[inline]
fn parse_proc_address(addr_str: &str) -> Result<(IpAddr, u16), String> {
    let (ip_str, port_str) = addr_str.split_once(':').ok_or("Invalid address format")?;

    let ip = if ip_str.len() == 32 {
        IpAddr::V6(parse_hex_ipv6(ip_str)?)
    } else {
        IpAddr::V4(parse_hex_ipv4(ip_str)?)
    };
    let port =
        u16::from_str_radix(port_str, 16).map_err(|e| format!("Failed to parse port: {e}"))?;

    Ok((ip, port))
}

/// Parse only the port out of an address field, skipping IP decoding.
///
/// Counting needs nothing but the local port and the state, so the hot path
/// avoids IP parsing entirely.
#[inline]
fn parse_proc_port(addr_str: &str) -> Result<u16, String> {
    let (_, port_str) = addr_str.split_once(':').ok_or("Invalid address format")?;
    u16::from_str_radix(port_str, 16).map_err(|e| format!("Failed to parse port: {e}"))
}

// ============================================================================
// TABLE SCANNING
// ============================================================================

/// Count ESTABLISHED rows with the given local port in one kernel table.
///
/// === FILTER ORDER ===
/// 1. State first (a single number comparison, rejects most rows)
/// 2. Local port (one hex parse, no IP decoding)
///
/// Malformed or short rows are skipped rather than failing the whole scan:
/// the kernel rewrites the table between reads, and a torn line must not
/// turn into a sampling failure.
fn count_established_in_table<R: BufRead>(reader: R, port: u16) -> Result<usize, String> {
    let mut count = 0_usize;

    for (line_num, line) in reader.lines().enumerate() {
        // First line is the column header, not data
        if line_num == 0 {
            continue;
        }

        let line = line.map_err(|e| format!("Failed to read line: {e}"))?;
        let fields: Vec<&str> = line.split_whitespace().collect();

        if fields.len() < 4 {
            continue;
        }

        // Cheapest check first: state code
        let state = u8::from_str_radix(fields[3], 16).unwrap_or(0);
        if state != TCP_ESTABLISHED {
            continue;
        }

        // Only parse the local port once the state matched
        if let Ok(local_port) = parse_proc_port(fields[1]) {
            if local_port == port {
                count += 1;
            }
        }
    }

    Ok(count)
}

/// List ESTABLISHED rows with the given local port in one kernel table.
///
/// Same filter order as counting; full address decoding happens only for
/// rows that already matched. Stops once `limit` records are collected.
fn list_established_in_table<R: BufRead>(
    reader: R,
    port: u16,
    limit: usize,
) -> Result<Vec<ConnectionRecord>, String> {
    let mut records = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        if line_num == 0 {
            continue;
        }

        let line = line.map_err(|e| format!("Failed to read line: {e}"))?;
        let fields: Vec<&str> = line.split_whitespace().collect();

        if fields.len() < 4 {
            continue;
        }

        let state = u8::from_str_radix(fields[3], 16).unwrap_or(0);
        if state != TCP_ESTABLISHED {
            continue;
        }

        let Ok((local_ip, local_port)) = parse_proc_address(fields[1]) else {
            continue;
        };
        if local_port != port {
            continue;
        }

        let Ok((remote_ip, remote_port)) = parse_proc_address(fields[2]) else {
            continue;
        };

        records.push(ConnectionRecord {
            local_address: format!("{local_ip}:{local_port}"),
            remote_address: format!("{remote_ip}:{remote_port}"),
            state: get_tcp_state_name(state).to_string(),
            state_code: state,
        });

        if records.len() >= limit {
            break;
        }
    }

    Ok(records)
}

/// Count established inbound connections to a local port.
///
/// === DATA SOURCE ===
/// /proc/net/tcp is required: failure to open or read it is a sampling
/// error that the caller must see as such. It is never reported as a count
/// of zero: a false zero would reset an in-progress attack window.
/// /proc/net/tcp6 is counted too when it exists (dual-stack listeners
/// accept over both families), but its absence is not an error: kernels
/// without IPv6 simply do not expose it.
pub fn count_established_to_port(port: u16) -> Result<usize, String> {
    let file =
        File::open("/proc/net/tcp").map_err(|e| format!("Cannot open /proc/net/tcp: {e}"))?;
    let mut count = count_established_in_table(BufReader::new(file), port)?;

    if let Ok(file6) = File::open("/proc/net/tcp6") {
        count += count_established_in_table(BufReader::new(file6), port)?;
    }

    Ok(count)
}

/// List established inbound connections to a local port.
///
/// Capped at `MAX_LISTED_CONNECTIONS` across both address families; the
/// exact population is available from `count_established_to_port`.
pub fn list_established_to_port(port: u16) -> Result<Vec<ConnectionRecord>, String> {
    let file =
        File::open("/proc/net/tcp").map_err(|e| format!("Cannot open /proc/net/tcp: {e}"))?;
    let mut records =
        list_established_in_table(BufReader::new(file), port, MAX_LISTED_CONNECTIONS)?;

    if records.len() < MAX_LISTED_CONNECTIONS {
        if let Ok(file6) = File::open("/proc/net/tcp6") {
            let remaining = MAX_LISTED_CONNECTIONS - records.len();
            records.extend(list_established_in_table(
                BufReader::new(file6),
                port,
                remaining,
            )?);
        }
    }

    Ok(records)
}
