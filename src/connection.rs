use log::{debug, trace, warn};

use crate::config::{ConnectionConfig, MAX_NUM_XMITS, MAX_SEG_DATA_SIZE, MSL_MS};
use crate::reorder::ReorderBuffer;
use crate::segment::{self, DecodedSegment, Segment};
use crate::substrate::{DatagramSocket, InputSource, InputStatus, OutputSink, OutputStatus, SendStatus};
use crate::unacked::{wrapping_lt, UnackedQueue};

#[derive(Debug, Default)]
struct TxState {
    last_ackno_rxed: u32,
    last_seqno_read: u32,
    last_seqno_sent: u32,
    eof_seen: bool,
    unacked: UnackedQueue,
}

#[derive(Debug, Default)]
struct RxState {
    last_seqno_accepted: u32,
    fin_seen: bool,
    truncated: u64,
    out_of_window: u64,
    invalid_cksum: u64,
    pending_output: ReorderBuffer,
}

// already in the data-transfer phase; there is no handshake at this layer
pub struct Connection<S: DatagramSocket> {
    config: ConnectionConfig,
    socket: S,
    tx: TxState,
    rx: RxState,
    time_wait_started_at: Option<u64>,
    destroyed: bool,
}

impl<S: DatagramSocket> Connection<S> {
    pub fn new(socket: S, config: ConnectionConfig) -> Self {
        Connection {
            config,
            socket,
            tx: TxState::default(),
            rx: RxState::default(),
            time_wait_started_at: None,
            destroyed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.destroyed
    }

    pub fn diagnostics(&self) -> (u64, u64, u64) {
        (self.rx.truncated, self.rx.out_of_window, self.rx.invalid_cksum)
    }

    // ---- input ingestion ------------------------------------------------

    pub fn on_readable(&mut self, input: &mut dyn InputSource, now_ms: u64) {
        if self.destroyed || self.tx.eof_seen {
            return;
        }

        let mut buf = vec![0u8; MAX_SEG_DATA_SIZE];
        loop {
            match input.read(&mut buf) {
                InputStatus::Data(n) => {
                    let seqno = self.tx.last_seqno_read.wrapping_add(1);
                    let segment = Segment::new(seqno, 0, segment::ACK, 0, buf[..n].to_vec());
                    self.tx.last_seqno_read = self.tx.last_seqno_read.wrapping_add(n as u32);
                    self.tx.unacked.push_back(segment);
                }
                InputStatus::WouldBlock => break,
                InputStatus::Eof => {
                    let seqno = self.tx.last_seqno_read.wrapping_add(1);
                    let fin = Segment::new(seqno, 0, segment::ACK | segment::FIN, 0, vec![]);
                    self.tx.unacked.push_back(fin);
                    self.tx.eof_seen = true;
                    break;
                }
            }
        }

        self.try_send_window(now_ms);
    }

    // ---- send driver ------------------------------------------------------

    fn try_send_window(&mut self, now_ms: u64) {
        if self.destroyed {
            return;
        }

        let send_window = self.config.send_window as u32;
        let correction = if self.tx.last_ackno_rxed == 0 { 1 } else { 0 };
        let last_allowable_seqno = self
            .tx
            .last_ackno_rxed
            .wrapping_sub(1)
            .wrapping_add(send_window)
            .wrapping_add(correction);

        let mut i = 0;
        while i < self.tx.unacked.len() {
            let (last_seqno_of_segment, num_xmits, last_send_ms) = {
                let w = self.tx.unacked.get(i).expect("index in bounds");
                (w.segment.last_seqno(), w.num_xmits, w.last_send_ms)
            };

            if wrapping_lt(last_allowable_seqno, last_seqno_of_segment) {
                break;
            }

            let should_send = if num_xmits == 0 {
                true
            } else if i == 0 && now_ms.saturating_sub(last_send_ms) > self.config.rt_timeout_ms {
                true
            } else {
                false
            };

            if should_send {
                self.send_wrapped_at(i, now_ms);
                if self.destroyed {
                    return;
                }
            }

            i += 1;
        }
    }

    fn send_wrapped_at(&mut self, i: usize, now_ms: u64) {
        let ackno = self.rx.last_seqno_accepted.wrapping_add(1);
        let window = self.config.recv_window;

        let bytes = {
            let wrapped = match self.tx.unacked.get_mut(i) {
                Some(w) => w,
                None => return,
            };

            if wrapped.num_xmits >= MAX_NUM_XMITS {
                warn!("retransmit limit reached, destroying connection");
                self.destroyed = true;
                return;
            }

            wrapped.segment.ackno = ackno;
            wrapped.segment.flags |= segment::ACK;
            wrapped.segment.window = window;
            wrapped.segment.encode()
        };

        let status = self.socket.send(&bytes);
        let sent_len = bytes.len();
        let mut fully_sent: Option<usize> = None;

        if let Some(wrapped) = self.tx.unacked.get_mut(i) {
            match status {
                SendStatus::Sent(n) => {
                    trace!("sent segment, {n}/{sent_len} bytes, xmit #{}", wrapped.num_xmits + 1);
                    wrapped.num_xmits += 1;
                    wrapped.last_send_ms = now_ms;
                    if n == sent_len {
                        fully_sent = Some(n);
                    }
                }
                SendStatus::WouldBlock => {}
                SendStatus::Fatal => {
                    warn!("fatal error sending segment, destroying connection");
                    self.destroyed = true;
                }
            }
        }

        if let Some(n) = fully_sent {
            self.tx.last_seqno_sent = self.tx.last_seqno_sent.wrapping_add(n as u32);
        }
    }

    fn send_pure_ack(&mut self) {
        if self.destroyed {
            return;
        }

        let ack = Segment::new(
            0,
            self.rx.last_seqno_accepted.wrapping_add(1),
            segment::ACK,
            self.config.recv_window,
            vec![],
        );

        match self.socket.send(&ack.encode()) {
            SendStatus::Fatal => {
                warn!("fatal error sending pure ack, destroying connection");
                self.destroyed = true;
            }
            SendStatus::Sent(_) | SendStatus::WouldBlock => {}
        }
    }

    // ---- receive path -------------------------------------------------

    pub fn on_segment(&mut self, bytes: &[u8], output: &mut dyn OutputSink, now_ms: u64) {
        if self.destroyed {
            return;
        }

        let segment = match Segment::decode(bytes) {
            None => {
                self.rx.truncated += 1;
                return;
            }
            Some(DecodedSegment::Truncated { .. }) => {
                self.rx.truncated += 1;
                debug!("dropping truncated segment");
                return;
            }
            Some(DecodedSegment::InvalidChecksum) => {
                self.rx.invalid_cksum += 1;
                debug!("dropping segment with invalid checksum");
                return;
            }
            Some(DecodedSegment::Ok(segment)) => segment,
        };

        let data_bytes = segment.data.len() as u32;
        if data_bytes > 0 {
            let smallest = self.rx.last_seqno_accepted.wrapping_add(1);
            let largest = self
                .rx
                .last_seqno_accepted
                .wrapping_add(self.config.recv_window as u32);
            let last_of_segment = segment.seqno.wrapping_add(data_bytes).wrapping_sub(1);

            let too_low = wrapping_lt(segment.seqno, smallest);
            let too_high = wrapping_lt(largest, last_of_segment);
            if too_low || too_high {
                self.rx.out_of_window += 1;
                debug!("dropping out-of-window segment, seqno={}", segment.seqno);
                self.send_pure_ack();
                return;
            }
        }

        if segment.is_ack() {
            self.tx.last_ackno_rxed = self.tx.last_ackno_rxed.max(segment.ackno);
            self.tx.unacked.drop_acked(self.tx.last_ackno_rxed);
        }

        if data_bytes > 0 || segment.is_fin() {
            self.rx.pending_output.insert(segment);
        }

        self.flush_output(output);
        self.try_send_window(now_ms);
    }

    // ---- delivery to output -----------------------------------------------

    fn flush_output(&mut self, output: &mut dyn OutputSink) {
        if self.destroyed {
            return;
        }

        let mut needs_ack = false;

        loop {
            let head_seqno = match self.rx.pending_output.front() {
                None => break,
                Some(head) => head.seqno,
            };
            let expected = self.rx.last_seqno_accepted.wrapping_add(1);

            if head_seqno != expected {
                if wrapping_lt(head_seqno, expected) {
                    self.rx.pending_output.pop_front();
                    needs_ack = true;
                    continue;
                }
                break;
            }

            let has_data = !self.rx.pending_output.front().unwrap().data.is_empty();
            let data_len = self.rx.pending_output.front().unwrap().data.len();

            if has_data {
                if output.buffer_space() < data_len {
                    break;
                }

                let head = self.rx.pending_output.pop_front().unwrap();
                match output.write(&head.data) {
                    OutputStatus::Fatal => {
                        warn!("fatal error writing to output sink, destroying connection");
                        self.destroyed = true;
                        return;
                    }
                    OutputStatus::Written(_) => {
                        self.rx.last_seqno_accepted =
                            self.rx.last_seqno_accepted.wrapping_add(data_len as u32);
                        needs_ack = true;
                    }
                }

                if head.is_fin() && !self.rx.fin_seen {
                    self.deliver_fin(output);
                }
            } else {
                let head = self.rx.pending_output.pop_front().unwrap();
                if head.is_fin() && !self.rx.fin_seen {
                    self.deliver_fin(output);
                    needs_ack = true;
                }
            }
        }

        if needs_ack {
            self.send_pure_ack();
        }
    }

    fn deliver_fin(&mut self, output: &mut dyn OutputSink) {
        self.rx.fin_seen = true;
        self.rx.last_seqno_accepted = self.rx.last_seqno_accepted.wrapping_add(1);
        if let OutputStatus::Fatal = output.write_eof() {
            warn!("fatal error writing eof to output sink, destroying connection");
            self.destroyed = true;
        }
    }

    // ---- lifecycle & TIME_WAIT ---------------------------------------------

    fn teardown_eligible(&self) -> bool {
        self.rx.fin_seen && self.tx.eof_seen && self.tx.unacked.is_empty() && self.rx.pending_output.is_empty()
    }

    // returns true once torn down and ready to drop from the registry
    pub fn on_tick(&mut self, output: &mut dyn OutputSink, now_ms: u64) -> bool {
        if self.destroyed {
            return true;
        }

        self.flush_output(output);
        if self.destroyed {
            return true;
        }

        self.try_send_window(now_ms);
        if self.destroyed {
            return true;
        }

        if self.teardown_eligible() {
            match self.time_wait_started_at {
                None => {
                    self.time_wait_started_at = Some(now_ms);
                }
                Some(started) => {
                    if now_ms.saturating_sub(started) > 2 * MSL_MS {
                        self.destroyed = true;
                    }
                }
            }
        } else {
            self.time_wait_started_at = None;
        }

        self.destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeSocket {
        sent: Vec<Vec<u8>>,
    }

    impl DatagramSocket for FakeSocket {
        fn send(&mut self, buf: &[u8]) -> SendStatus {
            self.sent.push(buf.to_vec());
            SendStatus::Sent(buf.len())
        }
    }

    struct FakeInput {
        chunks: VecDeque<Vec<u8>>,
        eof: bool,
    }

    impl FakeInput {
        fn new(chunks: Vec<&[u8]>) -> Self {
            FakeInput {
                chunks: chunks.into_iter().map(|c| c.to_vec()).collect(),
                eof: false,
            }
        }
    }

    impl InputSource for FakeInput {
        fn read(&mut self, buf: &mut [u8]) -> InputStatus {
            if let Some(chunk) = self.chunks.pop_front() {
                buf[..chunk.len()].copy_from_slice(&chunk);
                InputStatus::Data(chunk.len())
            } else if !self.eof {
                self.eof = true;
                InputStatus::Eof
            } else {
                InputStatus::WouldBlock
            }
        }
    }

    #[derive(Default)]
    struct FakeOutput {
        written: Vec<u8>,
        eof: bool,
        space: usize,
    }

    impl FakeOutput {
        fn with_space(space: usize) -> Self {
            FakeOutput {
                written: vec![],
                eof: false,
                space,
            }
        }
    }

    impl OutputSink for FakeOutput {
        fn write(&mut self, buf: &[u8]) -> OutputStatus {
            self.written.extend_from_slice(buf);
            OutputStatus::Written(buf.len())
        }

        fn write_eof(&mut self) -> OutputStatus {
            self.eof = true;
            OutputStatus::Written(0)
        }

        fn buffer_space(&self) -> usize {
            self.space
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            recv_window: 64,
            send_window: 64,
            tick_period_ms: 50,
            rt_timeout_ms: 200,
        }
    }

    #[test]
    fn single_segment_happy_path() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut input = FakeInput::new(vec![b"hello"]);

        conn.on_readable(&mut input, 0);
        assert_eq!(conn.socket.sent.len(), 1);
        let sent = Segment::decode(&conn.socket.sent[0]).unwrap();
        match sent {
            DecodedSegment::Ok(seg) => {
                assert_eq!(seg.seqno, 1);
                assert_eq!(seg.data, b"hello");
                assert!(seg.is_ack());
                assert!(!seg.is_fin());
            }
            other => panic!("unexpected: {other:?}"),
        }

        // EOF read next time on_readable is driven.
        conn.on_readable(&mut input, 0);
        assert_eq!(conn.socket.sent.len(), 2);
        match Segment::decode(&conn.socket.sent[1]).unwrap() {
            DecodedSegment::Ok(seg) => {
                assert_eq!(seg.seqno, 6);
                assert!(seg.is_fin());
                assert!(seg.data.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn reordered_arrival_delivers_once_gap_fills() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut out = FakeOutput::with_space(1024);

        let b = Segment::new(4, 0, segment::ACK, 64, b"def".to_vec());
        conn.on_segment(&b.encode(), &mut out, 0);
        assert!(out.written.is_empty());

        let a = Segment::new(1, 0, segment::ACK, 64, b"abc".to_vec());
        conn.on_segment(&a.encode(), &mut out, 0);
        assert_eq!(out.written, b"abcdef");
        assert_eq!(conn.rx.last_seqno_accepted, 6);
    }

    #[test]
    fn duplicate_segment_is_dropped_and_acked() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut out = FakeOutput::with_space(1024);

        let a = Segment::new(1, 0, segment::ACK, 64, b"abc".to_vec());
        conn.on_segment(&a.encode(), &mut out, 0);
        assert_eq!(out.written, b"abc");
        let acks_after_first = conn.socket.sent.len();

        conn.on_segment(&a.encode(), &mut out, 0);
        assert_eq!(out.written, b"abc");
        assert_eq!(conn.rx.out_of_window, 1);
        assert!(conn.socket.sent.len() > acks_after_first);
    }

    #[test]
    fn retransmits_head_after_timeout_only() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut input = FakeInput::new(vec![b"x"]);
        input.eof = true; // suppress the FIN for this test
        conn.on_readable(&mut input, 0);
        assert_eq!(conn.socket.sent.len(), 1);

        conn.try_send_window(199);
        assert_eq!(conn.socket.sent.len(), 1, "no retransmit before rt_timeout_ms");

        conn.try_send_window(201);
        assert_eq!(conn.socket.sent.len(), 2, "retransmit after rt_timeout_ms");
    }

    #[test]
    fn window_edge_is_inclusive() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        conn.rx.last_seqno_accepted = 9;

        let mut out = FakeOutput::with_space(1024);
        let exactly_at_edge = Segment::new(10, 0, segment::ACK, 0, vec![0u8; 64].into());
        conn.on_segment(&exactly_at_edge.encode(), &mut out, 0);
        assert_eq!(conn.rx.out_of_window, 0);
        assert_eq!(out.written.len(), 64);

        conn.rx.last_seqno_accepted = 9;
        out = FakeOutput::with_space(1024);
        let one_past_edge = Segment::new(10, 0, segment::ACK, 0, vec![0u8; 65].into());
        conn.on_segment(&one_past_edge.encode(), &mut out, 0);
        assert_eq!(conn.rx.out_of_window, 1);
        assert!(out.written.is_empty());
    }

    #[test]
    fn fatal_send_destroys_connection() {
        struct DeadSocket;
        impl DatagramSocket for DeadSocket {
            fn send(&mut self, _buf: &[u8]) -> SendStatus {
                SendStatus::Fatal
            }
        }

        let mut conn = Connection::new(DeadSocket, config());
        let mut input = FakeInput::new(vec![b"x"]);
        conn.on_readable(&mut input, 0);
        assert!(conn.is_closed());
    }

    #[test]
    fn max_xmits_reached_destroys_connection() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut input = FakeInput::new(vec![b"x"]);
        input.eof = true; // suppress the FIN so there is exactly one unacked entry
        conn.on_readable(&mut input, 0);
        assert_eq!(conn.socket.sent.len(), 1);

        // Never ACKed, so every pass past rt_timeout_ms retransmits the head.
        // xmit #1 already happened above; drive four more, then the one that
        // trips MAX_NUM_XMITS.
        let mut now = 0u64;
        for expected_sent in 2..=5 {
            now += config().rt_timeout_ms + 1;
            conn.try_send_window(now);
            assert_eq!(conn.socket.sent.len(), expected_sent);
            assert!(!conn.is_closed());
        }

        now += config().rt_timeout_ms + 1;
        conn.try_send_window(now);
        assert!(conn.is_closed());
    }

    #[test]
    fn flow_control_stalls_delivery_until_sink_drains() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut out = FakeOutput::with_space(0);

        let a = Segment::new(1, 0, segment::ACK, 64, b"abc".to_vec());
        conn.on_segment(&a.encode(), &mut out, 0);
        assert!(out.written.is_empty());
        assert_eq!(conn.rx.last_seqno_accepted, 0);

        out.space = 16;
        conn.on_tick(&mut out, 0);
        assert_eq!(out.written, b"abc");
        assert_eq!(conn.rx.last_seqno_accepted, 3);
    }

    #[test]
    fn retransmitted_fin_after_delivery_is_discarded_not_stuck() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut out = FakeOutput::with_space(1024);

        let fin = Segment::new(1, 0, segment::ACK | segment::FIN, 64, vec![]);
        conn.on_segment(&fin.encode(), &mut out, 0);
        assert!(out.eof);
        assert!(conn.rx.fin_seen);
        assert!(conn.rx.pending_output.is_empty());

        let acks_after_first = conn.socket.sent.len();

        // Peer never saw our ACK and retransmits the same FIN.
        conn.on_segment(&fin.encode(), &mut out, 0);
        assert!(
            conn.rx.pending_output.is_empty(),
            "a late duplicate FIN must not get stuck in pending_output"
        );
        assert!(conn.socket.sent.len() > acks_after_first, "the duplicate should be re-acked");
    }

    #[test]
    fn fin_with_no_data_occupies_one_sequence_slot_and_no_data_follows() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut out = FakeOutput::with_space(1024);

        let data = Segment::new(1, 0, segment::ACK, 64, b"ab".to_vec());
        conn.on_segment(&data.encode(), &mut out, 0);
        let fin = Segment::new(3, 0, segment::ACK | segment::FIN, 64, vec![]);
        conn.on_segment(&fin.encode(), &mut out, 0);

        assert_eq!(conn.rx.last_seqno_accepted, 3);
        assert!(out.eof);
    }

    #[test]
    fn fin_arriving_before_a_data_gap_waits_for_the_gap_to_fill() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut out = FakeOutput::with_space(1024);

        // FIN at seqno 4 arrives first; data at seqno 1..=3 is still missing.
        let fin = Segment::new(4, 0, segment::ACK | segment::FIN, 64, vec![]);
        conn.on_segment(&fin.encode(), &mut out, 0);
        assert!(out.written.is_empty());
        assert!(!out.eof, "FIN must not be delivered ahead of the gap it follows");
        assert_eq!(conn.rx.last_seqno_accepted, 0);

        let data = Segment::new(1, 0, segment::ACK, 64, b"abc".to_vec());
        conn.on_segment(&data.encode(), &mut out, 0);
        assert_eq!(out.written, b"abc");
        assert!(out.eof, "FIN delivers once the gap fills");
        assert_eq!(conn.rx.last_seqno_accepted, 4);
    }

    #[test]
    fn corrupted_segment_is_dropped_silently() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut out = FakeOutput::with_space(1024);

        let a = Segment::new(1, 0, segment::ACK, 64, b"hello".to_vec());
        let mut wire = a.encode();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        conn.on_segment(&wire, &mut out, 0);
        assert!(out.written.is_empty());
        assert_eq!(conn.rx.invalid_cksum, 1);
        assert!(conn.socket.sent.is_empty(), "no ack sent for a corrupted segment");
    }

    #[test]
    fn teardown_requires_time_wait_then_destroys() {
        let mut conn = Connection::new(FakeSocket::default(), config());
        let mut out = FakeOutput::with_space(1024);

        // Drive local EOF: queue + deliver our own FIN and pop it off unacked
        // by simulating the peer's ACK.
        let mut input = FakeInput::new(vec![]);
        conn.on_readable(&mut input, 0);
        assert!(conn.tx.eof_seen);

        let peer_ack = Segment::new(0, 2, segment::ACK, 64, vec![]);
        conn.on_segment(&peer_ack.encode(), &mut out, 0);
        assert!(conn.tx.unacked.is_empty());

        let peer_fin = Segment::new(1, 0, segment::ACK | segment::FIN, 64, vec![]);
        conn.on_segment(&peer_fin.encode(), &mut out, 0);
        assert!(conn.rx.fin_seen);

        assert!(!conn.on_tick(&mut out, 0));
        assert!(!conn.on_tick(&mut out, 2 * MSL_MS));
        assert!(conn.on_tick(&mut out, 2 * MSL_MS + 1));
        assert!(conn.is_closed());
    }
}
