//! TCP connection tracking.
//!
//! Each connection is followed through the three-way handshake and the
//! four-way close as seen by a passive observer. A segment that does not fit
//! the expected step (wrong order, wrong sequence or acknowledgment number) is
//! rejected without touching the flow's state: the capture may simply have
//! missed a packet or caught a retransmission.
//!
//! Sequence arithmetic is modulo 2^32.

use crate::analyzer::types::{AddressPair, PacketRecord};
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a segment was not accepted as the next step of its flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("step {step} seen before step {missing}")]
    OutOfOrder { step: u8, missing: u8 },

    #[error("step {step} acknowledges {actual}, expected {expected}")]
    AckMismatch { step: u8, expected: u32, actual: u32 },

    #[error("step {step} carries sequence number {actual}, expected {expected}")]
    SeqMismatch { step: u8, expected: u32, actual: u32 },
}

/// Lifecycle position of a flow, derived from the steps recorded so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    SynSent,
    SynReceived,
    Established,
    FinWait,
    CloseWait,
    LastAck,
    Closed,
}

impl FlowState {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowState::SynSent     => "SYN_SENT",
            FlowState::SynReceived => "SYN_RECEIVED",
            FlowState::Established => "ESTABLISHED",
            FlowState::FinWait     => "FIN_WAIT",
            FlowState::CloseWait   => "CLOSE_WAIT",
            FlowState::LastAck     => "LAST_ACK",
            FlowState::Closed      => "CLOSED",
        }
    }
}

/// One tracked TCP connection.
///
/// `client` is the endpoint that sent the opening SYN. Step fields hold the
/// numbers recorded at each transition and stay `None` until it happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFlow {
    pub client:          String,
    pub server:          String,
    /// The frame that opened the flow.
    pub opening:         PacketRecord,
    /// Step 1: client initial sequence number.
    pub client_isn:      Option<u32>,
    /// Step 2: server acknowledgment of the client SYN.
    pub syn_ack_ack:     Option<u32>,
    /// Step 2: server initial sequence number.
    pub server_isn:      Option<u32>,
    /// Step 3: client sequence number in the final handshake ACK.
    pub handshake_seq:   Option<u32>,
    /// Step 3: client acknowledgment of the server SYN.
    pub handshake_ack:   Option<u32>,
    /// Step 4: sequence number of the first FIN.
    pub fin_seq:         Option<u32>,
    /// Step 5: acknowledgment of the first FIN.
    pub fin_ack:         Option<u32>,
    /// Step 6: sequence number of the second FIN.
    pub second_fin_seq:  Option<u32>,
    /// Step 7: acknowledgment of the second FIN.
    pub last_ack:        Option<u32>,
    pub connected:       bool,
    pub closed:          bool,
    /// Frame bytes of every segment seen on this flow.
    pub bytes:           u64,
}

impl TcpFlow {
    fn open(record: &PacketRecord, seq: u32) -> Self {
        Self {
            client:         record.source_endpoint(),
            server:         record.destination_endpoint(),
            opening:        record.clone(),
            client_isn:     Some(seq),
            syn_ack_ack:    None,
            server_isn:     None,
            handshake_seq:  None,
            handshake_ack:  None,
            fin_seq:        None,
            fin_ack:        None,
            second_fin_seq: None,
            last_ack:       None,
            connected:      false,
            closed:         false,
            bytes:          record.frame_len as u64,
        }
    }

    pub fn state(&self) -> FlowState {
        if self.closed {
            FlowState::Closed
        } else if self.second_fin_seq.is_some() {
            FlowState::LastAck
        } else if self.fin_ack.is_some() {
            FlowState::CloseWait
        } else if self.fin_seq.is_some() {
            FlowState::FinWait
        } else if self.connected {
            FlowState::Established
        } else if self.server_isn.is_some() {
            FlowState::SynReceived
        } else {
            FlowState::SynSent
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Step 2. Requires step 1 and an acknowledgment of the client ISN.
    fn syn_ack(&mut self, seq: u32, ack: u32) -> Result<(), FlowError> {
        let isn = self.client_isn.ok_or(FlowError::OutOfOrder { step: 2, missing: 1 })?;
        let expected = isn.wrapping_add(1);
        if ack != expected {
            return Err(FlowError::AckMismatch { step: 2, expected, actual: ack });
        }

        self.syn_ack_ack = Some(ack);
        self.server_isn  = Some(seq);
        Ok(())
    }

    /// Step 3. Requires steps 1 and 2 and both numbers to advance by one.
    fn handshake_ack(&mut self, seq: u32, ack: u32) -> Result<(), FlowError> {
        let client_isn = self.client_isn.ok_or(FlowError::OutOfOrder { step: 3, missing: 1 })?;
        let server_isn = self.server_isn.ok_or(FlowError::OutOfOrder { step: 3, missing: 2 })?;

        let expected_ack = server_isn.wrapping_add(1);
        if ack != expected_ack {
            return Err(FlowError::AckMismatch { step: 3, expected: expected_ack, actual: ack });
        }
        let expected_seq = client_isn.wrapping_add(1);
        if seq != expected_seq {
            return Err(FlowError::SeqMismatch { step: 3, expected: expected_seq, actual: seq });
        }

        self.handshake_seq = Some(seq);
        self.handshake_ack = Some(ack);
        self.connected     = true;
        Ok(())
    }
}

/// What a segment did to the flow table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// No flow exists and the segment is not an opening SYN.
    Ignored,
    /// A SYN created a new flow.
    Opened,
    /// The final handshake ACK arrived. Carries the frame that opened the flow.
    HandshakeCompleted { opening: PacketRecord },
    /// The final close ACK arrived and the flow moved to the closed list.
    Closed,
    /// The flow advanced a close step or only accumulated bytes.
    Updated,
    /// The segment was counted but did not fit the flow's next step.
    Rejected(FlowError),
}

/// Active connections keyed by their endpoint pair, plus closed ones in
/// completion order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlowTable {
    active: BTreeMap<AddressPair, TcpFlow>,
    closed: Vec<TcpFlow>,
}

impl FlowTable {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one TCP segment. `record` must carry both ports and the flags.
    pub fn process(&mut self, record: &PacketRecord, seq: u32, ack: u32) -> FlowEvent {
        let key   = AddressPair::new(record.source_endpoint(), record.destination_endpoint());
        let flags = record.tcp_flags;

        let Some(flow) = self.active.get_mut(&key) else {
            if flags.syn && !flags.ack {
                self.active.insert(key, TcpFlow::open(record, seq));
                return FlowEvent::Opened;
            }
            return FlowEvent::Ignored;
        };

        flow.bytes += record.frame_len as u64;

        if !flow.connected {
            let result = if flags.syn && flags.ack {
                flow.syn_ack(seq, ack).map(|_| FlowEvent::Updated)
            } else if flags.ack {
                flow.handshake_ack(seq, ack)
                    .map(|_| FlowEvent::HandshakeCompleted { opening: flow.opening.clone() })
            } else {
                Ok(FlowEvent::Updated)
            };
            return result.unwrap_or_else(FlowEvent::Rejected);
        }

        // Connected: walk the close sequence.
        if flags.fin && flow.fin_seq.is_none() {
            flow.fin_seq = Some(seq);
        } else if flags.ack && !flags.fin && flow.fin_seq.is_some() && flow.fin_ack.is_none() {
            flow.fin_ack = Some(ack);
        } else if flags.fin && !flags.ack && flow.fin_ack.is_some() && flow.second_fin_seq.is_none() {
            flow.second_fin_seq = Some(seq);
        } else if flags.fin
            && flags.ack
            && flow.fin_seq.is_some()
            && flow.fin_ack.is_none()
            && flow.second_fin_seq.is_none()
        {
            flow.fin_ack        = Some(ack);
            flow.second_fin_seq = Some(seq);
        } else if flags.ack
            && !flags.fin
            && flow.fin_ack.is_some()
            && flow.second_fin_seq.is_some()
            && flow.last_ack.is_none()
        {
            flow.last_ack = Some(ack);
            flow.closed   = true;
            if let Some(done) = self.active.remove(&key) {
                self.closed.push(done);
            }
            return FlowEvent::Closed;
        }

        FlowEvent::Updated
    }

    #[cfg(test)]
    pub fn get(&self, key: &AddressPair) -> Option<&TcpFlow> {
        self.active.get(key)
    }

    /// Whether the connection between the record's two endpoints has completed
    /// its handshake and is not yet closed.
    pub fn is_established(&self, record: &PacketRecord) -> bool {
        let key = AddressPair::new(record.source_endpoint(), record.destination_endpoint());
        self.active.get(&key).map_or(false, TcpFlow::is_connected)
    }

    pub fn active(&self) -> impl Iterator<Item = &TcpFlow> {
        self.active.values()
    }

    pub fn closed(&self) -> &[TcpFlow] {
        &self.closed
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::types::TcpFlags;
    use chrono::Utc;

    const CLIENT: (&str, u16) = ("10.0.0.2", 40000);
    const SERVER: (&str, u16) = ("10.0.0.1", 80);

    fn segment(from: (&str, u16), to: (&str, u16), syn: bool, ack: bool, fin: bool) -> PacketRecord {
        let mut record = PacketRecord::new(0, Utc::now(), 60);
        record.src_ip    = from.0.into();
        record.src_port  = Some(from.1);
        record.dst_ip    = to.0.into();
        record.dst_port  = Some(to.1);
        record.tcp_flags = TcpFlags { syn, ack, fin };
        record
    }

    fn key() -> AddressPair {
        AddressPair::new("10.0.0.2:40000", "10.0.0.1:80")
    }

    fn handshake(table: &mut FlowTable) {
        assert_eq!(table.process(&segment(CLIENT, SERVER, true, false, false), 100, 0), FlowEvent::Opened);
        assert_eq!(table.process(&segment(SERVER, CLIENT, true, true, false), 500, 101), FlowEvent::Updated);
        assert!(matches!(
            table.process(&segment(CLIENT, SERVER, false, true, false), 101, 501),
            FlowEvent::HandshakeCompleted { .. }
        ));
    }

    #[test]
    fn three_way_handshake_connects() {
        let mut table = FlowTable::new();
        handshake(&mut table);

        let flow = table.get(&key()).unwrap();
        assert!(flow.is_connected());
        assert_eq!(flow.state(), FlowState::Established);
        assert_eq!(flow.client, "10.0.0.2:40000");
        assert_eq!(flow.server, "10.0.0.1:80");
        assert_eq!(flow.bytes, 180);
    }

    #[test]
    fn wrong_syn_ack_is_rejected_without_state_change() {
        let mut table = FlowTable::new();
        table.process(&segment(CLIENT, SERVER, true, false, false), 100, 0);

        let event = table.process(&segment(SERVER, CLIENT, true, true, false), 500, 999);
        assert_eq!(
            event,
            FlowEvent::Rejected(FlowError::AckMismatch { step: 2, expected: 101, actual: 999 })
        );

        let flow = table.get(&key()).unwrap();
        assert_eq!(flow.state(), FlowState::SynSent);
        assert_eq!(flow.server_isn, None);
        assert!(!flow.is_connected());
        // Rejected segments still count towards the flow's bytes.
        assert_eq!(flow.bytes, 120);
    }

    #[test]
    fn ack_before_syn_ack_is_out_of_order() {
        let mut table = FlowTable::new();
        table.process(&segment(CLIENT, SERVER, true, false, false), 100, 0);

        let event = table.process(&segment(CLIENT, SERVER, false, true, false), 101, 1);
        assert_eq!(event, FlowEvent::Rejected(FlowError::OutOfOrder { step: 3, missing: 2 }));
    }

    #[test]
    fn handshake_sequence_wraps_around() {
        let mut table = FlowTable::new();
        table.process(&segment(CLIENT, SERVER, true, false, false), u32::MAX, 0);
        table.process(&segment(SERVER, CLIENT, true, true, false), u32::MAX, 0);
        let event = table.process(&segment(CLIENT, SERVER, false, true, false), 0, 0);

        assert!(matches!(event, FlowEvent::HandshakeCompleted { .. }));
    }

    #[test]
    fn mid_stream_segments_are_ignored() {
        let mut table = FlowTable::new();
        let event = table.process(&segment(CLIENT, SERVER, false, true, false), 5, 5);
        assert_eq!(event, FlowEvent::Ignored);
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn four_way_close_moves_flow_to_closed() {
        let mut table = FlowTable::new();
        handshake(&mut table);

        table.process(&segment(CLIENT, SERVER, false, true, true), 101, 501);
        table.process(&segment(SERVER, CLIENT, false, true, false), 501, 102);
        assert_eq!(table.get(&key()).unwrap().state(), FlowState::CloseWait);
        table.process(&segment(SERVER, CLIENT, false, false, true), 501, 0);
        assert_eq!(table.get(&key()).unwrap().state(), FlowState::LastAck);

        let event = table.process(&segment(CLIENT, SERVER, false, true, false), 102, 502);
        assert_eq!(event, FlowEvent::Closed);
        assert_eq!(table.active_count(), 0);

        let closed = &table.closed()[0];
        assert!(closed.is_closed());
        assert_eq!(closed.fin_seq, Some(101));
        assert_eq!(closed.last_ack, Some(502));
        assert_eq!(closed.bytes, 60 * 7);
    }

    #[test]
    fn combined_fin_ack_covers_steps_five_and_six() {
        let mut table = FlowTable::new();
        handshake(&mut table);

        table.process(&segment(CLIENT, SERVER, false, false, true), 101, 0);
        table.process(&segment(SERVER, CLIENT, false, true, true), 501, 102);

        let flow = table.get(&key()).unwrap();
        assert_eq!(flow.fin_ack, Some(102));
        assert_eq!(flow.second_fin_seq, Some(501));

        assert_eq!(table.process(&segment(CLIENT, SERVER, false, true, false), 102, 502), FlowEvent::Closed);
    }

    #[test]
    fn new_syn_after_close_opens_fresh_flow() {
        let mut table = FlowTable::new();
        handshake(&mut table);
        table.process(&segment(CLIENT, SERVER, false, true, true), 101, 501);
        table.process(&segment(SERVER, CLIENT, false, true, true), 501, 102);
        table.process(&segment(CLIENT, SERVER, false, true, false), 102, 502);

        assert_eq!(table.process(&segment(CLIENT, SERVER, true, false, false), 9000, 0), FlowEvent::Opened);
        assert_eq!(table.closed().len(), 1);
        assert_eq!(table.active_count(), 1);
    }
}
