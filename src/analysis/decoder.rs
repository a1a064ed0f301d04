//! Best-effort frame decoding.
//!
//! Turns the raw bytes of a [`CapturedRecord`] into the structured fields the
//! key extractors look at. Decoding never fails as a whole: whatever cannot be
//! parsed is simply absent from the result, and application payloads that look
//! like DNS or HTTP but do not parse are kept as `Err` so extractors can count
//! them as unclassified.

pub mod dns;
pub mod http;

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use pdu::{Ethernet, EthernetPdu, Ipv4, Ipv4Pdu, Ipv6, Ipv6Pdu, Tcp, Udp};

use crate::data_capture::CapturedRecord;
use crate::error_handling::types::ExtractionError;

pub use dns::{DnsAnswer, DnsMessage};
pub use http::HttpRequest;

pub const LAYER_ETHERNET: &str = "Ethernet";
pub const LAYER_IPV4: &str = "IP";
pub const LAYER_IPV6: &str = "IPv6";
pub const LAYER_ARP: &str = "ARP";
pub const LAYER_TCP: &str = "TCP";
pub const LAYER_UDP: &str = "UDP";
pub const LAYER_ICMP: &str = "ICMP";
pub const LAYER_ICMPV6: &str = "ICMPv6";
pub const LAYER_GRE: &str = "GRE";
pub const LAYER_DNS: &str = "DNS";
pub const LAYER_HTTP: &str = "HTTP";
pub const LAYER_TLS: &str = "TLS";
pub const LAYER_RAW: &str = "Raw";

const DNS_PORTS: [u16; 2] = [53, 5353];
const HTTP_PORTS: [u16; 2] = [80, 8080];
pub const SECURE_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Icmp,
}

/// Sender of an ARP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpSender {
    pub ip: Ipv4Addr,
    pub mac: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRecord {
    pub link_source: Option<String>,
    pub link_destination: Option<String>,
    pub network_source: Option<IpAddr>,
    pub network_destination: Option<IpAddr>,
    pub transport: Option<Transport>,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
    /// Protocol names from the link layer up, one per depth.
    pub layers: Vec<&'static str>,
    pub arp: Option<ArpSender>,
    pub dns: Option<Result<DnsMessage, ExtractionError>>,
    pub http: Option<Result<HttpRequest, ExtractionError>>,
}

fn mac_to_string(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

impl DecodedRecord {
    /// Decodes an Ethernet frame.
    pub fn decode(frame: &[u8]) -> Self {
        let mut record = DecodedRecord::default();
        let Ok(eth) = EthernetPdu::new(frame) else {
            return record;
        };
        record.layers.push(LAYER_ETHERNET);
        record.link_source = Some(mac_to_string(eth.source_address()));
        record.link_destination = Some(mac_to_string(eth.destination_address()));

        match eth.inner() {
            Ok(Ethernet::Ipv4(ipv4)) => record.decode_ipv4(ipv4),
            Ok(Ethernet::Ipv6(ipv6)) => record.decode_ipv6(ipv6),
            Ok(Ethernet::Arp(arp)) => {
                record.layers.push(LAYER_ARP);
                record.arp = Some(ArpSender {
                    ip: Ipv4Addr::from(arp.sender_protocol_address()),
                    mac: mac_to_string(arp.sender_hardware_address()),
                });
            }
            Ok(Ethernet::Raw(payload)) if !payload.is_empty() => record.layers.push(LAYER_RAW),
            Ok(Ethernet::Raw(_)) | Err(_) => {}
        }
        record
    }

    fn decode_ipv4(&mut self, ipv4: Ipv4Pdu<'_>) {
        self.layers.push(LAYER_IPV4);
        self.network_source = Some(IpAddr::V4(Ipv4Addr::from(ipv4.source_address())));
        self.network_destination = Some(IpAddr::V4(Ipv4Addr::from(ipv4.destination_address())));
        match ipv4.inner() {
            Ok(Ipv4::Tcp(tcp)) => {
                self.set_ports(Transport::Tcp, tcp.source_port(), tcp.destination_port());
                if let Ok(Tcp::Raw(payload)) = tcp.inner() {
                    self.decode_application(payload);
                }
            }
            Ok(Ipv4::Udp(udp)) => {
                self.set_ports(Transport::Udp, udp.source_port(), udp.destination_port());
                let len = (udp.length() as usize).saturating_sub(8);
                if let Ok(Udp::Raw(payload)) = udp.inner() {
                    self.decode_application(&payload[..len.min(payload.len())]);
                }
            }
            Ok(Ipv4::Icmp(_)) => {
                self.transport = Some(Transport::Icmp);
                self.layers.push(LAYER_ICMP);
            }
            Ok(Ipv4::Gre(_)) => self.layers.push(LAYER_GRE),
            Ok(Ipv4::Raw(payload)) if !payload.is_empty() => self.layers.push(LAYER_RAW),
            Ok(Ipv4::Raw(_)) | Err(_) => {}
        }
    }

    fn decode_ipv6(&mut self, ipv6: Ipv6Pdu<'_>) {
        self.layers.push(LAYER_IPV6);
        self.network_source = Some(IpAddr::V6(Ipv6Addr::from(ipv6.source_address())));
        self.network_destination = Some(IpAddr::V6(Ipv6Addr::from(ipv6.destination_address())));
        match ipv6.inner() {
            Ok(Ipv6::Tcp(tcp)) => {
                self.set_ports(Transport::Tcp, tcp.source_port(), tcp.destination_port());
                if let Ok(Tcp::Raw(payload)) = tcp.inner() {
                    self.decode_application(payload);
                }
            }
            Ok(Ipv6::Udp(udp)) => {
                self.set_ports(Transport::Udp, udp.source_port(), udp.destination_port());
                if let Ok(Udp::Raw(payload)) = udp.inner() {
                    self.decode_application(payload);
                }
            }
            Ok(Ipv6::Icmp(_)) => {
                self.transport = Some(Transport::Icmp);
                self.layers.push(LAYER_ICMPV6);
            }
            Ok(Ipv6::Gre(_)) => self.layers.push(LAYER_GRE),
            Ok(Ipv6::Raw(payload)) if !payload.is_empty() => self.layers.push(LAYER_RAW),
            Ok(Ipv6::Raw(_)) | Err(_) => {}
        }
    }

    fn set_ports(&mut self, transport: Transport, source: u16, destination: u16) {
        self.transport = Some(transport);
        self.layers.push(match transport {
            Transport::Tcp => LAYER_TCP,
            Transport::Udp => LAYER_UDP,
            Transport::Icmp => LAYER_ICMP,
        });
        self.source_port = Some(source);
        self.destination_port = Some(destination);
    }

    fn decode_application(&mut self, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        if self.uses_port(&DNS_PORTS) {
            let message = match self.transport {
                // DNS over TCP carries a two byte length prefix.
                Some(Transport::Tcp) if payload.len() > 2 => &payload[2..],
                _ => payload,
            };
            self.layers.push(LAYER_DNS);
            self.dns = Some(dns::parse(message));
        } else if http::looks_like_request(payload) || self.uses_port(&HTTP_PORTS) {
            self.layers.push(LAYER_HTTP);
            self.http = http::parse_request(payload).transpose();
        } else if self.transport == Some(Transport::Tcp) && self.uses_port(&[SECURE_PORT]) {
            self.layers.push(LAYER_TLS);
        } else {
            self.layers.push(LAYER_RAW);
        }
    }

    pub fn uses_port(&self, ports: &[u16]) -> bool {
        [self.source_port, self.destination_port]
            .iter()
            .flatten()
            .any(|p| ports.contains(p))
    }

    /// One-line description, e.g. `Ethernet / IP / UDP 10.0.0.2:5353 > 10.0.0.1:53 / DNS`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let transport_depth = if self.source_port.is_some() { 3 } else { self.layers.len() };
        out.push_str(&self.layers[..transport_depth.min(self.layers.len())].join(" / "));

        if let (Some(src), Some(dst)) = (self.network_source, self.network_destination) {
            match (self.source_port, self.destination_port) {
                (Some(sp), Some(dp)) => {
                    let _ = write!(out, " {} > {}", socket(src, sp), socket(dst, dp));
                }
                _ => {
                    let _ = write!(out, " {} > {}", src, dst);
                }
            }
        } else if let Some(arp) = &self.arp {
            let _ = write!(out, " who-has from {} ({})", arp.ip, arp.mac);
        }

        for layer in self.layers.iter().skip(transport_depth) {
            let _ = write!(out, " / {}", layer);
        }
        if out.is_empty() {
            out.push_str("undecodable frame");
        }
        out
    }
}

fn socket(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}:{}", v4, port),
        IpAddr::V6(v6) => format!("[{}]:{}", v6, port),
    }
}

/// A decoded record together with its capture time in epoch seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedRecord {
    pub timestamp: f64,
    pub record: DecodedRecord,
}

impl From<&CapturedRecord> for TimedRecord {
    fn from(captured: &CapturedRecord) -> Self {
        Self {
            timestamp: captured.epoch_seconds(),
            record: DecodedRecord::decode(&captured.data),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MAC_A: [u8; 6] = [0x02, 0, 0, 0, 0, 0x0a];
    pub(crate) const MAC_B: [u8; 6] = [0x02, 0, 0, 0, 0, 0x0b];

    pub(crate) fn ethernet(ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(14 + payload.len());
        frame.extend_from_slice(&MAC_B);
        frame.extend_from_slice(&MAC_A);
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    pub(crate) fn ipv4(src: [u8; 4], dst: [u8; 4], protocol: u8, payload: &[u8]) -> Vec<u8> {
        let total = (20 + payload.len()) as u16;
        let mut header = vec![0x45, 0];
        header.extend_from_slice(&total.to_be_bytes());
        header.extend_from_slice(&[0, 1, 0x40, 0, 64, protocol, 0, 0]);
        header.extend_from_slice(&src);
        header.extend_from_slice(&dst);
        let mut sum: u32 = header
            .chunks(2)
            .map(|w| u32::from(u16::from_be_bytes([w[0], w[1]])))
            .sum();
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        header[10..12].copy_from_slice(&(!(sum as u16)).to_be_bytes());
        header.extend_from_slice(payload);
        header
    }

    pub(crate) fn udp(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut segment = Vec::with_capacity(8 + payload.len());
        segment.extend_from_slice(&sport.to_be_bytes());
        segment.extend_from_slice(&dport.to_be_bytes());
        segment.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        segment.extend_from_slice(&[0, 0]);
        segment.extend_from_slice(payload);
        segment
    }

    pub(crate) fn tcp(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut segment = Vec::with_capacity(20 + payload.len());
        segment.extend_from_slice(&sport.to_be_bytes());
        segment.extend_from_slice(&dport.to_be_bytes());
        segment.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 0x50, 0x18, 0xff, 0xff, 0, 0, 0, 0]);
        segment.extend_from_slice(payload);
        segment
    }

    pub(crate) fn udp_frame(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, payload: &[u8]) -> Vec<u8> {
        ethernet(0x0800, &ipv4(src, dst, 17, &udp(sport, dport, payload)))
    }

    pub(crate) fn tcp_frame(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, payload: &[u8]) -> Vec<u8> {
        ethernet(0x0800, &ipv4(src, dst, 6, &tcp(sport, dport, payload)))
    }

    pub(crate) fn arp_frame(sender_ip: [u8; 4], target_ip: [u8; 4]) -> Vec<u8> {
        let mut body = vec![0, 1, 0x08, 0x00, 6, 4, 0, 1];
        body.extend_from_slice(&MAC_A);
        body.extend_from_slice(&sender_ip);
        body.extend_from_slice(&[0; 6]);
        body.extend_from_slice(&target_ip);
        ethernet(0x0806, &body)
    }

    #[test]
    fn test_decode_udp_dns_response() {
        let payload = dns::tests::response("example.com", &[[1, 2, 3, 4]]);
        let record = DecodedRecord::decode(&udp_frame([8, 8, 8, 8], 53, [10, 0, 0, 2], 40000, &payload));

        assert_eq!(record.layers, vec!["Ethernet", "IP", "UDP", "DNS"]);
        assert_eq!(record.network_source, Some("8.8.8.8".parse().unwrap()));
        assert_eq!(record.destination_port, Some(40000));
        assert_eq!(record.link_source.as_deref(), Some("02:00:00:00:00:0a"));
        let dns = record.dns.unwrap().unwrap();
        assert_eq!(dns.answers[0].rdata, "1.2.3.4");
    }

    #[test]
    fn test_decode_http_request() {
        let record = DecodedRecord::decode(&tcp_frame(
            [10, 0, 0, 2],
            51000,
            [93, 184, 216, 34],
            80,
            b"GET /a HTTP/1.1\r\nHost: example.com\r\n\r\n",
        ));
        assert_eq!(record.layers, vec!["Ethernet", "IP", "TCP", "HTTP"]);
        assert_eq!(record.http.unwrap().unwrap().host, "example.com");
    }

    #[test]
    fn test_decode_tls_and_bare_tcp() {
        let tls = DecodedRecord::decode(&tcp_frame([10, 0, 0, 2], 51000, [1, 1, 1, 1], 443, &[0x16, 3, 1]));
        assert_eq!(tls.layers.last(), Some(&"TLS"));

        let ack = DecodedRecord::decode(&tcp_frame([10, 0, 0, 2], 51000, [1, 1, 1, 1], 443, &[]));
        assert_eq!(ack.layers, vec!["Ethernet", "IP", "TCP"]);
    }

    #[test]
    fn test_decode_arp() {
        let record = DecodedRecord::decode(&arp_frame([192, 168, 1, 7], [192, 168, 1, 1]));
        assert_eq!(record.layers, vec!["Ethernet", "ARP"]);
        let arp = record.arp.unwrap();
        assert_eq!(arp.ip, Ipv4Addr::new(192, 168, 1, 7));
        assert_eq!(arp.mac, "02:00:00:00:00:0a");
        assert!(record.network_source.is_none());
    }

    #[test]
    fn test_decode_garbage() {
        let record = DecodedRecord::decode(&[0xde, 0xad]);
        assert!(record.layers.is_empty());
        assert_eq!(record.summary(), "undecodable frame");
    }

    #[test]
    fn test_summary() {
        let record = DecodedRecord::decode(&udp_frame([10, 0, 0, 2], 5353, [10, 0, 0, 1], 53, &dns::tests::query("a.b")));
        assert_eq!(
            record.summary(),
            "Ethernet / IP / UDP 10.0.0.2:5353 > 10.0.0.1:53 / DNS"
        );
    }

    #[test]
    fn test_timed_record_from_captured() {
        use chrono::{TimeZone, Utc};
        let captured = CapturedRecord::new(
            Utc.timestamp_opt(100, 250_000_000).unwrap(),
            arp_frame([10, 0, 0, 1], [10, 0, 0, 2]),
        );
        let timed = TimedRecord::from(&captured);
        assert!((timed.timestamp - 100.25).abs() < 1e-9);
        assert!(timed.record.arp.is_some());
    }
}
