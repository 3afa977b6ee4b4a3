//! Turns a finished [`RunSummary`] into report events.

use crate::analyzer::detection::rfc3339;
use crate::analyzer::flow::TcpFlow;
use crate::analyzer::summary::{protocol_name, RunSummary};
use crate::analyzer::types::Mode;
use crate::logger::{Event, Logger};

const NO_ATTACKS: &str = "No attacks detected";

/// Logs the report for one capture file at the given detail level.
pub fn emit(summary: &RunSummary, mode: Mode, logger: &Logger) {
    for event in events(summary, mode) {
        logger.log(&event);
    }
}

fn events(summary: &RunSummary, mode: Mode) -> Vec<Event<'_>> {
    match mode {
        Mode::Basic => vec![basic_counts(summary)],
        Mode::Detailed => {
            let mut events = vec![basic_counts(summary)];
            events.extend(summary.flows.closed().iter().map(flow_detail));
            events.extend(summary.flows.active().map(flow_detail));
            events.extend(summary.protocols.iter().map(|(protocol, count)| Event::ProtocolCount {
                protocol,
                name: protocol_name(protocol),
                count,
            }));
            events
        }
        Mode::Attacks => attack_events(summary),
    }
}

fn basic_counts(summary: &RunSummary) -> Event<'_> {
    Event::BasicCounts {
        file:          &summary.source,
        unique_ips:    summary.unique_ips.len(),
        handshakes:    summary.handshake_count,
        udp_sources:   summary.udp_sources.len(),
        non_ip_frames: summary.non_ip_count,
        total_frames:  summary.frame_count,
    }
}

fn flow_detail(flow: &TcpFlow) -> Event<'_> {
    Event::FlowDetail {
        client:         &flow.client,
        server:         &flow.server,
        client_mac:     &flow.opening.src_mac,
        server_mac:     &flow.opening.dst_mac,
        state:          flow.state().as_str(),
        client_isn:     flow.client_isn,
        syn_ack_ack:    flow.syn_ack_ack,
        server_isn:     flow.server_isn,
        handshake_seq:  flow.handshake_seq,
        handshake_ack:  flow.handshake_ack,
        fin_seq:        flow.fin_seq,
        fin_ack:        flow.fin_ack,
        second_fin_seq: flow.second_fin_seq,
        last_ack:       flow.last_ack,
        bytes:          flow.bytes,
    }
}

fn attack_events(summary: &RunSummary) -> Vec<Event<'_>> {
    let mut events: Vec<Event> = summary
        .attacks
        .iter()
        .map(|attack| Event::Attack {
            name:        attack.name(),
            sources:     &attack.sources,
            targets:     &attack.targets,
            credentials: &attack.credentials,
            start:       rfc3339(attack.start),
            end:         attack.end.map_or_else(|| "-".to_string(), rfc3339),
            duration_ms: attack.duration_ms(),
        })
        .collect();

    events.extend(summary.spoofing_alerts.iter().map(|alert| Event::SpoofingSuspected {
        time:      rfc3339(alert.timestamp),
        ip:        &alert.ip,
        mac:       &alert.mac,
        known_mac: alert.known_mac.as_deref(),
        known_ip:  alert.known_ip.as_deref(),
        verdict:   alert.verdict,
    }));

    if events.is_empty() {
        events.push(Event::Info { message: NO_ATTACKS });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::arp::ArpVerdict;
    use crate::analyzer::detection::testing::{at, tcp};
    use crate::analyzer::detection::{AttackKind, AttackRecord};
    use crate::analyzer::summary::SpoofingAlert;
    use crate::analyzer::types::TcpFlags;

    fn summary_with_flow() -> RunSummary {
        let mut summary = RunSummary::new("lab.pcap");
        summary.frame_count = 3;
        summary.unique_ips.insert("10.0.0.1".into());
        summary.unique_ips.insert("10.0.0.2".into());
        summary.protocols.increment(17);
        summary.protocols.increment(6);

        let syn = TcpFlags { syn: true, ack: false, fin: false };
        summary.flows.process(&tcp(1, 0, ("10.0.0.2", 40_000), ("10.0.0.1", 80), syn), 100, 0);
        summary
    }

    #[test]
    fn basic_mode_is_a_single_count_line() {
        let summary = summary_with_flow();
        let events = events(&summary, Mode::Basic);

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Event::BasicCounts { file: "lab.pcap", unique_ips: 2, total_frames: 3, .. }
        ));
    }

    #[test]
    fn detailed_mode_lists_flows_then_protocols() {
        let summary = summary_with_flow();
        let events = events(&summary, Mode::Detailed);

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], Event::BasicCounts { .. }));
        assert!(matches!(
            events[1],
            Event::FlowDetail { client: "10.0.0.2:40000", state: "SYN_SENT", client_isn: Some(100), .. }
        ));
        assert!(matches!(events[2], Event::ProtocolCount { protocol: 6, name: "TCP", count: 1 }));
        assert!(matches!(events[3], Event::ProtocolCount { protocol: 17, name: "UDP", count: 1 }));
    }

    #[test]
    fn quiet_capture_says_so() {
        let summary = RunSummary::new("quiet.pcap");
        let events = events(&summary, Mode::Attacks);

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Info { message: NO_ATTACKS }));
    }

    #[test]
    fn attacks_come_before_spoofing_alerts() {
        let mut summary = RunSummary::new("noisy.pcap");

        let mut attack = AttackRecord::new(AttackKind::Smurf, at(0));
        attack.add_source("10.0.0.9");
        attack.end = Some(at(1_500));
        summary.attacks.push(attack);

        summary.spoofing_alerts.push(SpoofingAlert {
            timestamp: at(2_000),
            ip:        "10.0.0.5".into(),
            mac:       "bb:bb:bb:bb:bb:bb".into(),
            known_mac: Some("aa:aa:aa:aa:aa:aa".into()),
            known_ip:  None,
            verdict:   ArpVerdict::PossibleSpoofedMac,
        });

        let events = events(&summary, Mode::Attacks);
        assert_eq!(events.len(), 2);
        match &events[0] {
            Event::Attack { name, sources, duration_ms, .. } => {
                assert_eq!(*name, "SMURF ATTACK");
                assert_eq!(*sources, ["10.0.0.9".to_string()]);
                assert_eq!(*duration_ms, 1_500);
            }
            other => panic!("expected an attack, got {:?}", other),
        }
        assert!(matches!(
            events[1],
            Event::SpoofingSuspected {
                ip: "10.0.0.5",
                known_mac: Some("aa:aa:aa:aa:aa:aa"),
                known_ip: None,
                verdict: ArpVerdict::PossibleSpoofedMac,
                ..
            }
        ));
    }
}
