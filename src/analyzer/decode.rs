//! Layer-by-layer decoding of one frame.
//!
//! Each layer fills in its part of the [`PacketRecord`], updates the run
//! counters and hands its payload to the next layer. A header that cannot be
//! parsed aborts the file; an empty payload just ends the frame.

use crate::analyzer::config::*;
use crate::analyzer::detection::ping_of_death::is_oversized;
use crate::analyzer::flow::FlowEvent;
use crate::analyzer::fragment::Fragment;
use crate::analyzer::summary::SpoofingAlert;
use crate::analyzer::types::{PacketRecord, TcpFlags};
use crate::analyzer::Analyzer;
use crate::error::{AnalyzerError, Result};
use crate::logger::Event;

use etherparse::{
    Ethernet2HeaderSlice, Icmpv4Slice, Icmpv4Type, Icmpv6Slice, Icmpv6Type, Ipv4HeaderSlice,
    Ipv6HeaderSlice, TcpHeaderSlice, UdpHeaderSlice,
};
use pnet::packet::arp::{ArpOperations, ArpPacket};
use pnet::util::MacAddr;
use std::fmt::Display;

const IPV6_HEADER_LEN: usize = 40;

fn malformed(layer: &'static str, frame: u64, err: impl Display) -> AnalyzerError {
    AnalyzerError::Decode { layer, frame, detail: err.to_string() }
}

/// Copy of an IPv4 packet whose total length field is set to the bytes
/// actually captured.
fn with_total_length(data: &[u8]) -> Vec<u8> {
    let mut copy = data.to_vec();
    let length   = u16::try_from(data.len()).unwrap_or(u16::MAX);
    copy[2..4].copy_from_slice(&length.to_be_bytes());
    copy
}

fn mac(bytes: [u8; 6]) -> String {
    MacAddr::new(bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]).to_string()
}

impl Analyzer<'_> {
    // ── Link layer ───────────────────────────────────────────────────────────

    pub(super) fn ethernet(&mut self, record: &mut PacketRecord, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let eth = Ethernet2HeaderSlice::from_slice(data)
            .map_err(|e| malformed("ethernet", record.frame, e))?;
        record.src_mac    = mac(eth.source());
        record.dst_mac    = mac(eth.destination());
        record.ether_type = eth.ether_type();

        let payload = &data[eth.slice().len()..];
        match record.ether_type {
            ETHERTYPE_IPV4 => self.ipv4(record, payload),
            ETHERTYPE_IPV6 => self.ipv6(record, payload),
            ETHERTYPE_ARP if self.mode.detects_attacks() => self.arp(record, payload),
            ETHERTYPE_ARP => Ok(()),
            _ => {
                self.summary.non_ip_count += 1;
                Ok(())
            }
        }
    }

    /// Only requests are checked; replies are answers to someone else's
    /// question and say nothing new about the sender.
    fn arp(&mut self, record: &PacketRecord, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let arp = ArpPacket::new(data).ok_or_else(|| {
            malformed("arp", record.frame, format!("{} bytes is shorter than an ARP packet", data.len()))
        })?;
        if arp.get_operation() != ArpOperations::Request {
            return Ok(());
        }

        let ip  = arp.get_sender_proto_addr().to_string();
        let mac = arp.get_sender_hw_addr().to_string();
        let verdict = self.summary.ip_mac.query(&ip, &mac);
        self.logger.log(&Event::ArpQueried { frame: record.frame, ip: &ip, mac: &mac, verdict });

        if verdict.is_suspicious() {
            let known_mac = self.summary.ip_mac.get(&ip).map(|binding| binding.mac.clone());
            let known_ip  = self.summary.ip_mac.get(&mac).map(|binding| binding.ip.clone());
            self.summary.spoofing_alerts.push(SpoofingAlert {
                timestamp: record.timestamp,
                ip,
                mac,
                known_mac,
                known_ip,
                verdict,
            });
        }
        Ok(())
    }

    // ── Network layer ────────────────────────────────────────────────────────

    fn ipv4(&mut self, record: &mut PacketRecord, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        // A capturing NIC that offloads segmentation leaves the total length
        // at zero; such a datagram runs to the end of the frame.
        let patched: Vec<u8>;
        let data = if data.len() >= 4 && data[2..4] == [0, 0] {
            patched = with_total_length(data);
            &patched[..]
        } else {
            data
        };

        let ip = Ipv4HeaderSlice::from_slice(data).map_err(|e| malformed("IPv4", record.frame, e))?;
        record.src_ip   = ip.source_addr().to_string();
        record.dst_ip   = ip.destination_addr().to_string();
        record.protocol = Some(ip.protocol());

        // Ethernet pads short frames; the IPv4 total length says where the
        // datagram really ends.
        let header_len = ip.slice().len();
        let end        = usize::from(ip.total_len()).clamp(header_len, data.len());
        let payload    = &data[header_len..end];

        let rebuilt: Vec<u8>;
        let payload = if ip.more_fragments() || ip.fragments_offset() > 0 {
            let identification = ip.identification();
            let fragment = Fragment::from_header(ip.fragments_offset(), ip.more_fragments(), payload);
            let offset   = fragment.offset;

            let expired = self.summary.reassembler.expire(record.timestamp);
            if expired > 0 {
                self.logger.log(&Event::FragmentsExpired { frame: record.frame, datagrams: expired });
            }
            self.summary.reassembler.add_fragment(identification, fragment, record.timestamp);

            if ip.more_fragments() {
                self.logger.log(&Event::FragmentHeld {
                    frame: record.frame,
                    identification,
                    offset,
                    more_fragments: true,
                });
                return Ok(());
            }

            match self.summary.reassembler.reassemble(identification) {
                Ok(datagram) => {
                    self.logger.log(&Event::FragmentsReassembled {
                        frame:          record.frame,
                        identification: datagram.identification,
                        bytes:          datagram.payload.len(),
                    });
                    record.ip_identification = Some(datagram.identification);
                    record.reassembled       = true;
                    rebuilt = datagram.payload;
                    &rebuilt[..]
                }
                Err(e) => {
                    self.logger.log(&Event::ReassemblyFailed { frame: record.frame, reason: e.to_string() });
                    return Ok(());
                }
            }
        } else {
            payload
        };

        self.count_ip(record);
        self.transport(record, payload)
    }

    /// Extension headers are not walked: the next-header value is taken as
    /// the payload protocol.
    fn ipv6(&mut self, record: &mut PacketRecord, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let ip = Ipv6HeaderSlice::from_slice(data).map_err(|e| malformed("IPv6", record.frame, e))?;
        record.src_ip   = ip.source_addr().to_string();
        record.dst_ip   = ip.destination_addr().to_string();
        record.protocol = Some(ip.next_header());

        let end = match usize::from(ip.payload_length()) {
            0      => data.len(),
            length => (IPV6_HEADER_LEN + length).min(data.len()),
        };
        let payload = &data[IPV6_HEADER_LEN..end];

        self.count_ip(record);
        self.transport(record, payload)
    }

    fn count_ip(&mut self, record: &PacketRecord) {
        self.summary.unique_ips.insert(record.src_ip.clone());
        self.summary.unique_ips.insert(record.dst_ip.clone());
        if let Some(protocol) = record.protocol {
            self.summary.protocols.increment(protocol);
        }
    }

    fn transport(&mut self, record: &mut PacketRecord, payload: &[u8]) -> Result<()> {
        match record.protocol {
            Some(IP_PROTO_ICMP)   => self.icmpv4(record, payload),
            Some(IP_PROTO_ICMPV6) => self.icmpv6(record, payload),
            Some(IP_PROTO_TCP)    => self.tcp(record, payload),
            Some(IP_PROTO_UDP)    => self.udp(record, payload),
            Some(protocol) => {
                self.logger.log(&Event::ProtocolSkipped { frame: record.frame, protocol });
                Ok(())
            }
            None => Ok(()),
        }
    }

    // ── Transport layer ──────────────────────────────────────────────────────

    fn icmpv4(&mut self, record: &PacketRecord, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let icmp = Icmpv4Slice::from_slice(data).map_err(|e| malformed("ICMPv4", record.frame, e))?;
        let attacks = self.mode.detects_attacks();

        if attacks {
            let oversized = is_oversized(icmp.slice().len(), icmp.payload().len());
            let finished  = self.summary.detectors.ping_of_death.observe(record, oversized, self.logger);
            self.summary.record_attack(finished);
            if oversized {
                return Ok(());
            }
        }

        match icmp.icmp_type() {
            Icmpv4Type::EchoRequest(echo) => {
                self.log_echo(record, "ICMPv4 echo request", echo.id, echo.seq);
            }
            Icmpv4Type::EchoReply(echo) => {
                self.log_echo(record, "ICMPv4 echo reply", echo.id, echo.seq);
                if attacks {
                    let finished = self.summary.detectors.smurf.observe(record, self.logger);
                    self.summary.record_attack(finished);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn icmpv6(&mut self, record: &PacketRecord, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let icmp = Icmpv6Slice::from_slice(data).map_err(|e| malformed("ICMPv6", record.frame, e))?;
        match icmp.icmp_type() {
            Icmpv6Type::EchoRequest(echo) => self.log_echo(record, "ICMPv6 echo request", echo.id, echo.seq),
            Icmpv6Type::EchoReply(echo)   => self.log_echo(record, "ICMPv6 echo reply", echo.id, echo.seq),
            _ => {}
        }
        Ok(())
    }

    fn log_echo(&self, record: &PacketRecord, kind: &str, identifier: u16, sequence: u16) {
        self.logger.log(&Event::Echo {
            frame: record.frame,
            kind,
            src: &record.src_ip,
            dst: &record.dst_ip,
            identifier,
            sequence,
            datagram: record.ip_identification.filter(|_| record.reassembled),
        });
    }

    fn tcp(&mut self, record: &mut PacketRecord, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let tcp = TcpHeaderSlice::from_slice(data).map_err(|e| malformed("TCP", record.frame, e))?;
        record.src_port  = Some(tcp.source_port());
        record.dst_port  = Some(tcp.destination_port());
        record.tcp_flags = TcpFlags { syn: tcp.syn(), ack: tcp.ack(), fin: tcp.fin() };
        let seq     = tcp.sequence_number();
        let ack     = tcp.acknowledgment_number();
        let payload = &data[tcp.slice().len()..];

        let attacks = self.mode.detects_attacks();
        let record: &PacketRecord = record;

        if attacks {
            let finished = self.summary.detectors.port_scan.observe(record, self.logger);
            self.summary.record_attack(finished);

            let telnet = tcp.source_port() == TELNET_PORT || tcp.destination_port() == TELNET_PORT;
            if telnet && self.summary.flows.is_established(record) {
                let finished = self.summary.detectors.brute_force.observe(record, payload, self.logger);
                self.summary.record_attack(finished);
            }
        }

        match self.summary.flows.process(record, seq, ack) {
            FlowEvent::Opened if attacks => {
                let finished = self.summary.detectors.syn_flood.syn(record, self.logger);
                self.summary.record_attack(finished);
            }
            FlowEvent::HandshakeCompleted { opening } => {
                self.summary.handshake_count += 1;
                if attacks {
                    self.summary.detectors.syn_flood.ack_received(&opening.dst_ip, &opening);
                }
            }
            FlowEvent::Rejected(reason) => {
                let flow = format!("{} -> {}", record.source_endpoint(), record.destination_endpoint());
                self.logger.log(&Event::TransitionRejected {
                    frame:  record.frame,
                    flow:   &flow,
                    reason: reason.to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn udp(&mut self, record: &mut PacketRecord, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let udp = UdpHeaderSlice::from_slice(data).map_err(|e| malformed("UDP", record.frame, e))?;
        record.src_port = Some(udp.source_port());
        record.dst_port = Some(udp.destination_port());
        self.summary.udp_sources.insert(record.source_endpoint());
        Ok(())
    }
}
