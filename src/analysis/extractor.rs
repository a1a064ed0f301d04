//! Key extraction per traffic dimension.
//!
//! A [`KeyExtractor`] maps one record to the keys it contributes to a
//! dimension. Zero keys (or an [`ExtractionError`]) means the record is
//! unclassified for that dimension; several keys fan the record out.

use serde::{Deserialize, Serialize};

use super::decoder::{DecodedRecord, TimedRecord, Transport, SECURE_PORT};
use crate::error_handling::types::ExtractionError;

pub trait KeyExtractor<R>: Sync {
    fn extract(&self, record: &R) -> Result<Vec<String>, ExtractionError>;
}

impl<R, F> KeyExtractor<R> for F
where
    F: Fn(&R) -> Result<Vec<String>, ExtractionError> + Sync,
{
    fn extract(&self, record: &R) -> Result<Vec<String>, ExtractionError> {
        self(record)
    }
}

/// Traffic dimensions reported by the analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficDimension {
    SourceAddress,
    DestinationAddress,
    /// Protocol at the given stack depth: 1 link, 2 network, 3 transport,
    /// 4 application.
    ProtocolLayer(usize),
    ConversationEndpoint,
    ResolvedName,
    LinkSource,
}

impl TrafficDimension {
    /// Dimensions in report order.
    pub const REPORTED: [TrafficDimension; 8] = [
        TrafficDimension::SourceAddress,
        TrafficDimension::DestinationAddress,
        TrafficDimension::ProtocolLayer(2),
        TrafficDimension::ProtocolLayer(3),
        TrafficDimension::ProtocolLayer(4),
        TrafficDimension::ConversationEndpoint,
        TrafficDimension::ResolvedName,
        TrafficDimension::LinkSource,
    ];

    pub fn title(&self) -> String {
        match self {
            TrafficDimension::SourceAddress => "Top Source IPs".to_string(),
            TrafficDimension::DestinationAddress => "Top Destination IPs".to_string(),
            TrafficDimension::ProtocolLayer(depth) => {
                format!("Top Protocols at layer {}", depth)
            }
            TrafficDimension::ConversationEndpoint => "Top HTTP/HTTPS conversations".to_string(),
            TrafficDimension::ResolvedName => "Top DNS name resolutions".to_string(),
            TrafficDimension::LinkSource => "Top ARP senders".to_string(),
        }
    }

    /// Short identifier usable as a file or JSON key.
    pub fn slug(&self) -> String {
        match self {
            TrafficDimension::SourceAddress => "source_address".to_string(),
            TrafficDimension::DestinationAddress => "destination_address".to_string(),
            TrafficDimension::ProtocolLayer(depth) => format!("protocol_layer_{}", depth),
            TrafficDimension::ConversationEndpoint => "conversation".to_string(),
            TrafficDimension::ResolvedName => "resolved_name".to_string(),
            TrafficDimension::LinkSource => "link_source".to_string(),
        }
    }
}

fn single(key: Option<String>) -> Result<Vec<String>, ExtractionError> {
    key.map(|k| vec![k]).ok_or(ExtractionError::NotApplicable)
}

fn conversation(record: &DecodedRecord) -> Result<Vec<String>, ExtractionError> {
    if record.transport == Some(Transport::Tcp) {
        let peer = if record.destination_port == Some(SECURE_PORT) {
            record.network_destination
        } else if record.source_port == Some(SECURE_PORT) {
            record.network_source
        } else {
            None
        };
        if let Some(peer) = peer {
            return Ok(vec![format!("secure:{}", peer)]);
        }
    }
    match &record.http {
        Some(Ok(request)) => Ok(vec![format!("{}{}", request.host, request.path)]),
        Some(Err(e)) => Err(e.clone()),
        None => Err(ExtractionError::NotApplicable),
    }
}

fn resolved_names(record: &DecodedRecord) -> Result<Vec<String>, ExtractionError> {
    match &record.dns {
        Some(Ok(message)) if message.is_response => {
            Ok(message.answers.iter().map(|a| a.rdata.clone()).collect())
        }
        Some(Ok(_)) | None => Err(ExtractionError::NotApplicable),
        Some(Err(e)) => Err(e.clone()),
    }
}

impl KeyExtractor<DecodedRecord> for TrafficDimension {
    fn extract(&self, record: &DecodedRecord) -> Result<Vec<String>, ExtractionError> {
        match self {
            TrafficDimension::SourceAddress => single(record.network_source.map(|ip| ip.to_string())),
            TrafficDimension::DestinationAddress => {
                single(record.network_destination.map(|ip| ip.to_string()))
            }
            TrafficDimension::ProtocolLayer(depth) => single(
                depth
                    .checked_sub(1)
                    .and_then(|i| record.layers.get(i))
                    .map(|name| name.to_string()),
            ),
            TrafficDimension::ConversationEndpoint => conversation(record),
            TrafficDimension::ResolvedName => resolved_names(record),
            TrafficDimension::LinkSource => single(
                record
                    .arp
                    .as_ref()
                    .map(|arp| format!("{}({})", arp.ip, arp.mac)),
            ),
        }
    }
}

impl KeyExtractor<TimedRecord> for TrafficDimension {
    fn extract(&self, record: &TimedRecord) -> Result<Vec<String>, ExtractionError> {
        KeyExtractor::<DecodedRecord>::extract(self, &record.record)
    }
}
