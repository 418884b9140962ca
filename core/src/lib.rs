//! An inline TCP stream reassembly and rewriting engine.
//!
//! `rewire-core` sits between a packet capture source and an inspection
//! layer inside a network security appliance. For each direction of an
//! intercepted TCP flow it reassembles segments into an editable byte
//! stream: the inspection layer reads the stream, may save and rewind its
//! position, and may insert, erase, or replace bytes. Outbound segments are
//! re-emitted with the packet granularity they arrived with, payloads
//! rewritten to reflect the edits, and sequence numbers shifted so the
//! receiving endpoint sees a consistent byte stream. Acknowledgements
//! observed on the reverse direction are translated back into the sender's
//! original sequence space.
//!
//! The engine is transport-layer only: it neither captures packets nor
//! recomputes network-layer checksums, and it performs no application-layer
//! parsing. Each stream is owned by a single worker; streams share no
//! state, so flows scale across threads without locking.
//!
//! Rewriting an HTTP method in flight:
//!
//! ```rust
//! use rewire_core::segment::{ACK, SYN};
//! use rewire_core::{Stream, TcpSegment, TcpStream};
//!
//! let src = "10.0.0.1:43210".parse().unwrap();
//! let dst = "10.0.0.2:80".parse().unwrap();
//!
//! let mut stream = TcpStream::new();
//! stream.push(TcpSegment::new(src, dst, 1000, SYN, vec![])).unwrap();
//! stream
//!     .push(TcpSegment::new(src, dst, 1001, ACK, b"GET / HTTP/1.1\r\n".to_vec()))
//!     .unwrap();
//!
//! // inspect the method, then rewind and rewrite it on the wire
//! stream.mark();
//! let mut method = [0u8; 3];
//! assert_eq!(stream.read(&mut method), 3);
//! assert_eq!(&method, b"GET");
//! stream.rewind().unwrap();
//! stream.replace(b"PUT").unwrap();
//!
//! let out = stream.pop().unwrap();
//! assert_eq!(out.payload(), b"PUT / HTTP/1.1\r\n");
//! assert_eq!(out.seq_no(), 1001);
//! ```
//!
//! [`TcpConn`] pairs the two directions of a connection and routes
//! acknowledgement translation between them; [`ConnTracker`] maintains that
//! pairing for many connections.

pub mod config;
pub mod conntrack;
pub mod segment;
pub mod stream;

pub use self::conntrack::conn_id::{ConnId, FiveTuple};
pub use self::conntrack::{ConnTracker, TcpConn};
pub use self::segment::TcpSegment;
pub use self::stream::tcp::{Rejected, TcpStream};
pub use self::stream::{Stream, StreamError};
