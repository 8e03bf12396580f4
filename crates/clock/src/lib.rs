//! Wall-clock source for job timestamps
//!
//! Jobs are stamped by whichever worker or sync process touches them, so the
//! processes of a fleet need to agree on the time. The clock optionally
//! estimates its offset against an NTP server once at startup and never
//! hands out a timestamp earlier than the previous one.

mod sntp;

use chrono::{DateTime, Duration as TimeDelta, Utc};
use parking_lot::Mutex;
use std::env;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{Duration, timeout};
use tracing::{info, warn};

const NTP_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("NTP query failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response from NTP server {0} within {1:?}")]
    Timeout(String, Duration),

    #[error("malformed NTP response: {0}")]
    Packet(String),
}

/// Monotone wall clock, optionally NTP-corrected.
pub struct Clock {
    offset: TimeDelta,
    last: Mutex<DateTime<Utc>>,
}

impl Clock {
    /// A clock that trusts the local system time.
    pub fn system() -> Self {
        Self::with_offset(TimeDelta::zero())
    }

    fn with_offset(offset: TimeDelta) -> Self {
        Self {
            offset,
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Estimates the local clock offset with a single SNTP round against
    /// `server` (a `host:port` pair).
    pub async fn ntp(server: &str) -> Result<Self, ClockError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;

        let request = sntp::request();
        let sent = Utc::now();
        socket.send(&request).await?;

        let mut response = [0u8; sntp::PACKET_LEN];
        let received_len = timeout(NTP_QUERY_TIMEOUT, socket.recv(&mut response))
            .await
            .map_err(|_| ClockError::Timeout(server.to_string(), NTP_QUERY_TIMEOUT))??;
        let received = Utc::now();

        let offset = sntp::offset(&response[..received_len], sent, received)?;
        info!(
            "Clock synchronized against {} (offset {} ms)",
            server,
            offset.num_milliseconds()
        );
        Ok(Self::with_offset(offset))
    }

    /// Builds a clock from the `NTP_SERVER` environment variable, degrading
    /// to the system clock when the variable is unset or the server is
    /// unreachable.
    pub async fn from_env() -> Self {
        match env::var("NTP_SERVER") {
            Ok(server) => match Self::ntp(&server).await {
                Ok(clock) => clock,
                Err(e) => {
                    warn!("NTP sync against {} failed: {} - using system time", server, e);
                    Self::system()
                }
            },
            Err(_) => Self::system(),
        }
    }

    /// Current time. Never earlier than a previously returned value, even
    /// if the underlying system clock steps backwards.
    pub fn now(&self) -> DateTime<Utc> {
        let candidate = Utc::now() + self.offset;
        let mut last = self.last.lock();
        if candidate > *last {
            *last = candidate;
        }
        *last
    }
}
