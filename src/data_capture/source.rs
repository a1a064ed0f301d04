//! Packet sources feeding a capture session.
//!
//! A [`CaptureBackend`] opens a named interface and hands back a
//! [`PacketSource`], a blocking iterator over frames. Sources must return from
//! [`PacketSource::next_packet`] periodically even when the wire is silent,
//! otherwise the producer cannot observe cancellation.

use std::io;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info};
use pnet::datalink::{self, Channel, DataLinkReceiver};

use crate::error_handling::types::CaptureError;
use crate::storage::PCAP_SNAPLEN;

use super::types::CapturedRecord;

/// Poll interval used by [`PnetBackend`] when none is given.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Blocking stream of captured frames.
pub trait PacketSource: Send {
    /// Returns the next frame, `Ok(None)` when the read timed out with nothing
    /// to deliver.
    fn next_packet(&mut self) -> Result<Option<CapturedRecord>, CaptureError>;
}

/// Opens packet sources by interface name.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError>;
}

/// Live capture through the `pnet` datalink layer.
#[derive(Debug, Clone)]
pub struct PnetBackend {
    read_timeout: Duration,
}

impl PnetBackend {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    /// Channel settings: the receive buffer holds a full snaplen frame so the
    /// kernel never truncates what the capture file could store.
    fn channel_config(&self) -> datalink::Config {
        datalink::Config {
            read_timeout: Some(self.read_timeout),
            read_buffer_size: PCAP_SNAPLEN as usize,
            ..Default::default()
        }
    }
}

impl Default for PnetBackend {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

impl CaptureBackend for PnetBackend {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError> {
        let iface = datalink::interfaces()
            .into_iter()
            .find(|i| i.name == interface)
            .ok_or_else(|| CaptureError::InterfaceNotFound(interface.to_string()))?;

        match datalink::channel(&iface, self.channel_config()) {
            Ok(Channel::Ethernet(_, rx)) => {
                info!("Opened capture channel on {}", iface.name);
                Ok(Box::new(PnetSource { rx }))
            }
            Ok(_) => Err(CaptureError::UnsupportedChannel(interface.to_string())),
            Err(e) => Err(CaptureError::InterfaceUnavailable(interface.to_string(), e)),
        }
    }
}

struct PnetSource {
    rx: Box<dyn DataLinkReceiver>,
}

impl PacketSource for PnetSource {
    fn next_packet(&mut self) -> Result<Option<CapturedRecord>, CaptureError> {
        match self.rx.next() {
            Ok(frame) => Ok(Some(CapturedRecord::new(Utc::now(), frame.to_vec()))),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => {
                debug!("Datalink read failed: {}", e);
                Err(CaptureError::ReadFailed(e))
            }
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_buffer_fits_snaplen() {
        let backend = PnetBackend::new(Duration::from_millis(100));
        let config = backend.channel_config();
        assert_eq!(config.read_buffer_size, PCAP_SNAPLEN as usize);
        assert_eq!(config.read_timeout, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_unknown_interface() {
        let backend = PnetBackend::default();
        let err = backend.open("sna-does-not-exist0").err().unwrap();
        assert!(matches!(err, CaptureError::InterfaceNotFound(name) if name == "sna-does-not-exist0"));
    }

    #[test]
    fn test_timeouts_are_not_errors() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
