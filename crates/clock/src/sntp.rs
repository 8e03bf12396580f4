//! Minimal SNTP (RFC 4330) request/response handling. One round trip is
//! enough here: the pipeline needs timestamps consistent to well under a
//! bucket width, not disciplined timekeeping.

use crate::ClockError;
use chrono::{DateTime, Duration as TimeDelta, TimeZone, Utc};

pub const PACKET_LEN: usize = 48;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;

const MODE_SERVER: u8 = 4;

/// A client request: LI = 0, version 4, mode 3, everything else zero.
pub fn request() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = 0b00_100_011;
    packet
}

/// Clock offset computed from a server response and the local send/receive
/// stamps, per the standard two-sample formula.
pub fn offset(
    response: &[u8],
    sent: DateTime<Utc>,
    received: DateTime<Utc>,
) -> Result<TimeDelta, ClockError> {
    if response.len() < PACKET_LEN {
        return Err(ClockError::Packet(format!(
            "short packet: {} bytes",
            response.len()
        )));
    }
    let mode = response[0] & 0x07;
    if mode != MODE_SERVER {
        return Err(ClockError::Packet(format!("unexpected mode {mode}")));
    }
    // Stratum 0 is a kiss-of-death packet.
    if response[1] == 0 {
        return Err(ClockError::Packet("kiss-of-death (stratum 0)".into()));
    }

    let server_receive = timestamp(&response[32..40])?;
    let server_transmit = timestamp(&response[40..48])?;

    Ok(((server_receive - sent) + (server_transmit - received)) / 2)
}

fn timestamp(bytes: &[u8]) -> Result<DateTime<Utc>, ClockError> {
    let seconds = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let fraction = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if seconds == 0 {
        return Err(ClockError::Packet("zero timestamp".into()));
    }

    let unix_seconds = i64::from(seconds) - NTP_UNIX_OFFSET_SECS;
    let nanos = ((u64::from(fraction) * 1_000_000_000) >> 32) as u32;
    Utc.timestamp_opt(unix_seconds, nanos)
        .single()
        .ok_or_else(|| ClockError::Packet(format!("timestamp out of range: {unix_seconds}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_is_version_4_client() {
        let packet = request();
        assert_eq!(packet[0] >> 6, 0); // LI
        assert_eq!((packet[0] >> 3) & 0x07, 4); // version
        assert_eq!(packet[0] & 0x07, 3); // mode
        assert!(packet[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn timestamp_decodes_the_unix_epoch() {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&(NTP_UNIX_OFFSET_SECS as u32).to_be_bytes());
        let decoded = timestamp(&bytes).unwrap();
        assert_eq!(decoded, Utc.timestamp_opt(0, 0).single().unwrap());
    }

    #[test]
    fn half_fraction_is_half_a_second() {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&(NTP_UNIX_OFFSET_SECS as u32).to_be_bytes());
        bytes[4..].copy_from_slice(&(u32::MAX / 2 + 1).to_be_bytes());
        let decoded = timestamp(&bytes).unwrap();
        let expected = Utc.timestamp_opt(0, 500_000_000).single().unwrap();
        let delta = (decoded - expected).num_nanoseconds().unwrap().abs();
        assert!(delta < 2);
    }

    #[test]
    fn symmetric_delay_yields_the_true_offset() {
        // Client clock is 10 s behind the server; network delay is
        // symmetric, so the formula should recover exactly 10 s.
        let sent = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let received = sent + TimeDelta::milliseconds(200);
        let server_receive = sent + TimeDelta::seconds(10) + TimeDelta::milliseconds(100);
        let server_transmit = server_receive;

        let mut response = [0u8; PACKET_LEN];
        response[0] = 0b00_100_100; // version 4, mode 4
        response[1] = 2; // stratum
        response[32..40].copy_from_slice(&encode(server_receive));
        response[40..48].copy_from_slice(&encode(server_transmit));

        let offset = offset(&response, sent, received).unwrap();
        assert_eq!(offset.num_seconds(), 10);
    }

    fn encode(time: DateTime<Utc>) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        let seconds = (time.timestamp() + NTP_UNIX_OFFSET_SECS) as u32;
        let fraction =
            ((u64::from(time.timestamp_subsec_nanos()) << 32) / 1_000_000_000) as u32;
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..].copy_from_slice(&fraction.to_be_bytes());
        bytes
    }
}
