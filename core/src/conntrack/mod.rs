//! Connection state management.
//!
//! Pairs the two directed streams of a TCP connection and routes segments
//! between them: a segment's payload enters its own direction's stream,
//! while its acknowledgement number is translated against the reverse
//! direction's sent history. A [`ConnTracker`] maintains this pairing for
//! many connections at once.

pub mod conn_id;

use self::conn_id::{ConnId, FiveTuple};
use crate::config::{ConnTrackConfig, RuntimeConfig, StreamConfig};
use crate::segment::{TcpSegment, ACK, FIN, RST, SYN};
use crate::stream::tcp::{Rejected, TcpStream};

use hashlink::LinkedHashMap;

/// The two directed streams of one TCP connection.
pub struct TcpConn {
    five_tuple: FiveTuple,
    /// Originator-to-responder stream.
    pub ctos: TcpStream,
    /// Responder-to-originator stream.
    pub stoc: TcpStream,
    /// Control flags consumed from the originator.
    ctos_flags: u8,
    /// Control flags consumed from the responder.
    stoc_flags: u8,
}

impl TcpConn {
    /// Creates the stream pair for a connection originated by
    /// `five_tuple.orig`.
    pub fn new(five_tuple: FiveTuple, config: &StreamConfig) -> Self {
        TcpConn {
            five_tuple,
            ctos: TcpStream::with_config(config),
            stoc: TcpStream::with_config(config),
            ctos_flags: 0,
            stoc_flags: 0,
        }
    }

    /// Returns the connection endpoints.
    pub fn five_tuple(&self) -> FiveTuple {
        self.five_tuple
    }

    /// Returns `true` if `segment` travels in the direction of orig -> resp.
    pub fn packet_dir(&self, segment: &TcpSegment) -> bool {
        segment.src() == self.five_tuple.orig
    }

    /// Consumes an intercepted segment.
    ///
    /// The acknowledgement number is rewritten against the reverse
    /// direction's history, then segments that carry data (or a SYN) enter
    /// their direction's stream. Returns the segment when it is ready to be
    /// forwarded as-is; `None` means it is buffered and will surface through
    /// [`pop`](TcpConn::pop).
    pub fn inbound(&mut self, mut segment: TcpSegment) -> Result<Option<TcpSegment>, Rejected> {
        let dir = self.packet_dir(&segment);
        if dir {
            self.ctos_flags |= segment.flags();
        } else {
            self.stoc_flags |= segment.flags();
        }

        if segment.flags() & ACK != 0 {
            // this segment acknowledges bytes the reverse direction sent
            self.stream_mut(!dir).ack(&mut segment);
        }

        if segment.payload_len() > 0 || segment.flags() & SYN != 0 {
            self.stream_mut(dir).push(segment)
        } else {
            Ok(Some(segment))
        }
    }

    /// Drains the next rewritten segment ready to forward in `dir`.
    pub fn pop(&mut self, dir: bool) -> Option<TcpSegment> {
        self.stream_mut(dir).pop()
    }

    /// Returns the stream carrying bytes in `dir`.
    pub fn stream_mut(&mut self, dir: bool) -> &mut TcpStream {
        if dir {
            &mut self.ctos
        } else {
            &mut self.stoc
        }
    }

    /// Returns `true` if the connection should be torn down: both sides have
    /// sent FIN, or a RST has been seen.
    pub fn is_terminated(&self) -> bool {
        (self.ctos_flags & self.stoc_flags & FIN
            | self.ctos_flags & RST
            | self.stoc_flags & RST)
            != 0
    }

    /// Returns `true` once both streams have emitted everything they hold.
    pub fn is_drained(&self) -> bool {
        self.ctos.pending_segments() == 0 && self.stoc.pending_segments() == 0
    }
}

/// Manages state for all tracked TCP connections.
///
/// One `ConnTracker` is maintained per worker; trackers share no state.
/// Connections are created when a SYN is observed and removed once
/// terminated and drained.
pub struct ConnTracker {
    conntrack: ConnTrackConfig,
    stream: StreamConfig,
    table: LinkedHashMap<ConnId, TcpConn>,
}

impl ConnTracker {
    /// Creates a new `ConnTracker`.
    pub fn new(config: &RuntimeConfig) -> Self {
        ConnTracker {
            conntrack: config.conntrack.clone(),
            stream: config.stream.clone(),
            table: LinkedHashMap::with_capacity(config.conntrack.max_connections),
        }
    }

    /// Returns the number of tracked connections.
    pub fn size(&self) -> usize {
        self.table.len()
    }

    /// Processes a single intercepted segment.
    ///
    /// Returns the segment when it should be forwarded immediately (pure
    /// acknowledgements, SYNs, and traffic of untracked connections);
    /// `None` when it was buffered into a stream.
    pub fn process(&mut self, segment: TcpSegment) -> Result<Option<TcpSegment>, Rejected> {
        let conn_id = ConnId::new(segment.src(), segment.dst());
        if let Some(conn) = self.table.get_mut(&conn_id) {
            let forward = conn.inbound(segment)?;
            if conn.is_terminated() && conn.is_drained() {
                self.table.remove(&conn_id);
            }
            return Ok(forward);
        }

        // only a client SYN opens a new connection
        if segment.flags() & SYN != 0 && segment.flags() & ACK == 0 {
            if self.table.len() >= self.conntrack.max_connections {
                log::warn!("connection table full ({})", self.conntrack.max_connections);
                return Ok(Some(segment));
            }
            let mut conn = TcpConn::new(FiveTuple::from_segment(&segment), &self.stream);
            let forward = conn.inbound(segment)?;
            self.table.insert(conn_id, conn);
            return Ok(forward);
        }

        log::debug!("passing through segment of untracked connection");
        Ok(Some(segment))
    }

    /// Returns the connection identified by `id`, if tracked.
    pub fn get_mut(&mut self, id: &ConnId) -> Option<&mut TcpConn> {
        self.table.get_mut(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::stream::Stream;
    use std::net::SocketAddr;

    fn client() -> SocketAddr {
        "10.0.0.1:43210".parse().unwrap()
    }

    fn server() -> SocketAddr {
        "10.0.0.2:80".parse().unwrap()
    }

    fn client_syn(seq: u32) -> TcpSegment {
        TcpSegment::new(client(), server(), seq, SYN, vec![])
    }

    fn client_data(seq: u32, payload: &[u8]) -> TcpSegment {
        TcpSegment::new(client(), server(), seq, ACK, payload.to_vec())
    }

    fn server_ack(ack_no: u32) -> TcpSegment {
        let mut segment = TcpSegment::new(server(), client(), 5000, ACK, vec![]);
        segment.set_ack_no(ack_no);
        segment
    }

    #[test]
    fn packet_dir_follows_originator() {
        let conn = TcpConn::new(
            FiveTuple {
                orig: client(),
                resp: server(),
            },
            &StreamConfig::default(),
        );
        assert!(conn.packet_dir(&client_syn(1)));
        assert!(!conn.packet_dir(&server_ack(1)));
    }

    #[test]
    fn tracker_routes_payload_and_translates_acks() {
        let mut tracker = ConnTracker::new(&default_config());

        // handshake SYN opens the connection and is forwarded raw
        let fwd = tracker.process(client_syn(1000)).unwrap();
        assert!(fwd.is_some());
        assert_eq!(tracker.size(), 1);

        // client data is buffered into the ctos stream
        assert!(tracker
            .process(client_data(1001, b"GET /secret"))
            .unwrap()
            .is_none());

        let conn_id = ConnId::new(client(), server());
        let conn = tracker.get_mut(&conn_id).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(conn.ctos.read(&mut buf), 5);
        assert_eq!(&buf, b"GET /");
        assert_eq!(conn.ctos.erase(6), Ok(6));

        let out = conn.pop(true).unwrap();
        assert_eq!(out.payload(), b"GET /");
        assert_eq!(out.seq_no(), 1001);

        // the server acks the 5 bytes it saw; the client must see an ack
        // covering the 11 bytes it sent
        let translated = tracker.process(server_ack(1006)).unwrap().unwrap();
        assert_eq!(translated.ack_no(), 1012);
    }

    #[test]
    fn non_syn_traffic_of_unknown_connections_passes_through() {
        let mut tracker = ConnTracker::new(&default_config());
        let fwd = tracker.process(client_data(1001, b"X")).unwrap();
        assert!(fwd.is_some());
        assert_eq!(tracker.size(), 0);
    }

    #[test]
    fn table_capacity_is_bounded() {
        let mut config = default_config();
        config.conntrack.max_connections = 1;
        let mut tracker = ConnTracker::new(&config);

        tracker.process(client_syn(1)).unwrap();
        assert_eq!(tracker.size(), 1);

        let other = TcpSegment::new(
            "10.0.0.9:1234".parse().unwrap(),
            server(),
            1,
            SYN,
            vec![],
        );
        let fwd = tracker.process(other).unwrap();
        assert!(fwd.is_some());
        assert_eq!(tracker.size(), 1);
    }

    #[test]
    fn terminated_drained_connections_are_dropped() {
        let mut tracker = ConnTracker::new(&default_config());
        tracker.process(client_syn(1000)).unwrap();

        let mut rst = TcpSegment::new(client(), server(), 1001, RST | ACK, vec![]);
        rst.set_ack_no(2000);
        tracker.process(rst).unwrap();
        assert_eq!(tracker.size(), 0);
    }
}
