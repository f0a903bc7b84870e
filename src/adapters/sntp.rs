//! Minimal SNTP client (RFC 4330, unicast mode).
//!
//! One blocking query against one server with a hard timeout; the
//! ordered fallback across the configured server list lives in
//! [`ClockSync`](crate::timekeeping::ClockSync). The implementation is
//! plain `std::net` UDP and runs unchanged on target and host.
//!
//! Only the transmit timestamp is used: second-level accuracy is plenty
//! for hourly rainfall bucketing, so there is no round-trip-delay math.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::Duration;

use log::debug;

use crate::app::ports::{SntpError, SntpPort};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// NTP era 0 rolls over in 2036; stamps below this are era 1.
const ERA_SPLIT: u32 = 0x8000_0000;

#[derive(Default)]
pub struct SntpClient;

impl SntpClient {
    pub fn new() -> Self {
        Self
    }
}

impl SntpPort for SntpClient {
    fn query(&mut self, server: &str, timeout_ms: u32) -> Result<i64, SntpError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|_| SntpError::Unreachable)?;
        socket
            .set_read_timeout(Some(Duration::from_millis(timeout_ms as u64)))
            .map_err(|_| SntpError::Unreachable)?;
        // connect() resolves the hostname; DNS failure surfaces here.
        socket
            .connect((server, 123))
            .map_err(|_| SntpError::Unreachable)?;

        let mut request = [0u8; 48];
        request[0] = 0b00_100_011; // LI 0, version 4, mode 3 (client)
        socket.send(&request).map_err(|_| SntpError::Unreachable)?;

        let mut reply = [0u8; 48];
        let n = socket.recv(&mut reply).map_err(|e| {
            match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => SntpError::Timeout,
                _ => SntpError::Unreachable,
            }
        })?;
        debug!("sntp: {} replied with {} bytes", server, n);
        parse_reply(&reply[..n])
    }
}

/// Validate a server reply and extract Unix epoch seconds.
fn parse_reply(reply: &[u8]) -> Result<i64, SntpError> {
    if reply.len() < 48 {
        return Err(SntpError::BadReply);
    }
    let li = reply[0] >> 6;
    let mode = reply[0] & 0x07;
    let stratum = reply[1];
    // Mode must be "server"; LI 3 means the clock is unsynchronized;
    // stratum 0 is a kiss-o'-death packet.
    if mode != 4 || li == 3 || stratum == 0 || stratum > 15 {
        return Err(SntpError::BadReply);
    }
    let secs = u32::from_be_bytes([reply[40], reply[41], reply[42], reply[43]]);
    if secs == 0 {
        return Err(SntpError::BadReply);
    }
    // Era handling: stamps past the 2036 rollover read as small u32s.
    let epoch = if secs >= ERA_SPLIT {
        secs as i64 - NTP_UNIX_OFFSET
    } else {
        secs as i64 + (1i64 << 32) - NTP_UNIX_OFFSET
    };
    Ok(epoch)
}

// ───────────────────────────────────────────────────────────────────
