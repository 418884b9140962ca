//! Editable stream over one direction of a TCP flow.
//!
//! Segments pushed in sequence order surface as a contiguous byte stream.
//! The stream tracks two parallel sequence axes, both zero-based at the
//! initial data sequence number: *original* space (bytes as received) and
//! *modified* space (bytes as they will leave on the wire after edits).
//! Every edit is anchored to an offset inside one segment's original
//! payload, so emission can rebuild each outbound segment with the exact
//! framing it arrived with while sequence and acknowledgement numbers are
//! shifted to keep both endpoints consistent.
//!
//! A stream is single-owner: all operations complete synchronously on the
//! calling thread and streams share no state.

pub(crate) mod chunk;
pub(crate) mod position;

use self::chunk::{Chunk, ChunkId, Edit};
use self::position::{EditPos, EditSlot, Position};
use crate::config::StreamConfig;
use crate::segment::TcpSegment;
use crate::stream::{Stream, StreamError};

use std::cmp;
use std::collections::VecDeque;

use thiserror::Error;

/// A segment refused by [`TcpStream::push`]. The caller regains ownership of
/// the segment and may forward it unmodified or drop it on the wire.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct Rejected {
    pub segment: TcpSegment,
    pub reason: StreamError,
}

impl Rejected {
    fn new(segment: TcpSegment, reason: StreamError) -> Self {
        Rejected { segment, reason }
    }
}

/// Reassembles one direction of a TCP flow into an editable byte stream.
///
/// Lifecycle: a stream consumes a SYN to record its initial sequence number,
/// then accepts data segments with [`push`](TcpStream::push). The consumer
/// reads and edits the reassembled bytes through the [`Stream`] trait, and
/// drains rewritten segments with [`pop`](TcpStream::pop). Segments observed
/// on the reverse direction pass through [`ack`](TcpStream::ack) so their
/// acknowledgement numbers refer back to the sender's original sequence
/// space.
pub struct TcpStream {
    /// Initial data sequence number, recorded from the SYN.
    start_seq: Option<u32>,
    /// Chunks received but not yet emitted, ordered by `start_seq`.
    pending: VecDeque<Chunk>,
    /// Cumulative length delta of all chunks already popped; shifts the
    /// sequence numbers of future emissions.
    first_offset_seq: i64,
    /// Chunks emitted but retained for acknowledgement translation.
    sent: VecDeque<Chunk>,
    /// Cumulative length delta of sent chunks trimmed after being fully
    /// acknowledged.
    sent_offset_seq: i64,
    /// Read cursor.
    current: Position,
    /// Saved cursor for rewind. Never ahead of the read cursor.
    mark: Option<Position>,
    /// An insert scheduled before any segment has arrived; anchored in front
    /// of the next pushed chunk.
    pending_edit: Option<Edit>,
    next_chunk_id: u64,
    /// Inspect-only mode: edits are refused.
    passthrough: bool,
    max_pending: usize,
}

impl TcpStream {
    /// Creates an empty stream with default options.
    pub fn new() -> Self {
        Self::with_config(&StreamConfig::default())
    }

    /// Creates an empty stream configured by `config`.
    pub fn with_config(config: &StreamConfig) -> Self {
        TcpStream {
            start_seq: None,
            pending: VecDeque::new(),
            first_offset_seq: 0,
            sent: VecDeque::new(),
            sent_offset_seq: 0,
            current: Position::start(),
            mark: None,
            pending_edit: None,
            next_chunk_id: 0,
            passthrough: config.passthrough,
            max_pending: config.max_pending,
        }
    }

    /// Number of segments queued between push and pop.
    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }

    /// Installs a segment.
    ///
    /// A SYN records the initial sequence number (retransmitted SYNs are
    /// ignored) and is handed back for forwarding. Data segments are queued
    /// in sequence order and `Ok(None)` is returned; the stream owns the
    /// segment until [`pop`](TcpStream::pop) releases it rewritten.
    pub fn push(&mut self, segment: TcpSegment) -> Result<Option<TcpSegment>, Rejected> {
        if segment.syn() {
            if self.start_seq.is_none() {
                self.start_seq = Some(segment.seq_no().wrapping_add(1));
            }
            return Ok(Some(segment));
        }
        let initial = match self.start_seq {
            Some(initial) => initial,
            None => return Err(Rejected::new(segment, StreamError::InvalidStream)),
        };
        let seq = segment.seq_no();
        if seq < initial {
            return Err(Rejected::new(segment, StreamError::InvalidSeq { seq, initial }));
        }
        let start_seq = (seq - initial) as u64;
        let end_seq = start_seq + segment.payload_len() as u64;

        // bytes the read cursor has passed can no longer be integrated
        let read_edge = self.current.origin_seq();
        if start_seq < read_edge || end_seq < read_edge {
            log::debug!("dropping segment behind the read position: seq {}", seq);
            return Err(Rejected::new(segment, StreamError::Retransmit));
        }

        if self.pending.len() >= self.max_pending {
            log::warn!("pending segment limit reached ({})", self.max_pending);
            return Err(Rejected::new(segment, StreamError::PendingOverflow));
        }

        // splice before the first chunk that does not start below this one
        let splice_idx = match self.pending.back() {
            Some(last) if last.start_seq >= start_seq => self
                .pending
                .iter()
                .position(|c| c.start_seq >= start_seq)
                .unwrap_or(self.pending.len()),
            _ => self.pending.len(),
        };
        if let Some(successor) = self.pending.get(splice_idx) {
            if end_seq > successor.start_seq {
                log::debug!("dropping overlapping segment: seq {}", seq);
                return Err(Rejected::new(segment, StreamError::Retransmit));
            }
        }

        let id = ChunkId(self.next_chunk_id);
        self.next_chunk_id += 1;
        let mut chunk = Chunk::new(id, segment, start_seq, end_seq);

        if let Some(edit) = self.pending_edit.take() {
            debug_assert_eq!(edit.at(), 0);
            chunk.offset_seq += edit.len_delta();
            chunk.edits.push(edit);
        }

        self.pending.insert(splice_idx, chunk);
        Ok(None)
    }

    /// Emits the oldest chunk as a rewritten segment, or `None` while the
    /// read cursor (or a held mark) still needs its bytes.
    pub fn pop(&mut self) -> Option<TcpSegment> {
        let head_id = self.pending.front().map(|chunk| chunk.id);

        let mut pos = self.current;
        self.advance(&mut pos);
        match self.mark {
            Some(mark) => {
                if let Some(id) = head_id {
                    self.try_advance_chunk(&mut pos, id);
                }
                self.current = pos;

                let mut mark_pos = mark;
                self.advance(&mut mark_pos);
                if let Some(id) = head_id {
                    self.try_advance_chunk(&mut mark_pos, id);
                }
                self.mark = Some(mark_pos);
            }
            None => {
                // no reader holds a position: flush unread bytes so emission
                // is never held back by a lagging read cursor
                self.skip_available(&mut pos);
                if let Some(id) = head_id {
                    self.try_advance_chunk(&mut pos, id);
                }
                self.current = pos;
            }
        }

        let gate = self.mark.unwrap_or(self.current);
        let head = self.pending.front()?;
        if !gate.is_past_chunk(head) {
            return None;
        }

        let rendered = if head.edits.is_empty() {
            None
        } else {
            // rebuild the payload through a cursor pinned to this chunk, so
            // the real read and mark cursors are untouched
            let start_modif = (head.start_seq as i64 + self.first_offset_seq) as u64;
            let mut render_pos = Position {
                chunk_seq: head.start_seq,
                chunk_seq_modif: start_modif,
                seq_modif: start_modif,
                chunk: Some(head.id),
                chunk_offset: 0,
                edit: EditPos::Front,
            };
            let mut buf = vec![0u8; head.modified_len()];
            let rendered_len = self.read_at(&mut render_pos, &mut buf);
            debug_assert_eq!(rendered_len, buf.len());
            Some(buf)
        };

        let mut chunk = self.pending.pop_front()?;
        let mut segment = chunk.segment.take()?;
        if let Some(buf) = rendered {
            segment.resize_payload(buf.len()).copy_from_slice(&buf);
        }
        let shifted = segment.seq_no().wrapping_add(self.first_offset_seq as u32);
        segment.set_seq_no(shifted);

        self.first_offset_seq += chunk.offset_seq;
        chunk.edits.clear();
        if let Some(last_sent) = self.sent.back() {
            debug_assert_eq!(last_sent.end_seq, chunk.start_seq);
        }
        self.sent.push_back(chunk);
        Some(segment)
    }

    /// Rewrites the acknowledgement number of a reverse-direction segment
    /// from modified space (what the peer saw) back to the original space of
    /// this stream's sender. Sent chunks the acknowledgement has moved past
    /// are trimmed.
    pub fn ack(&mut self, segment: &mut TcpSegment) {
        if self.sent.is_empty() {
            return;
        }
        let initial = self.start_seq.unwrap_or(0);
        let ack = segment.ack_no().wrapping_sub(initial) as u64;

        let front = &self.sent[0];
        let mut seq = (self.sent_offset_seq + front.start_seq as i64) as u64;
        let mut new_seq = front.start_seq;
        let mut fully_acked = 0;

        for (idx, chunk) in self.sent.iter().enumerate() {
            if let Some(next) = self.sent.get(idx + 1) {
                debug_assert_eq!(next.start_seq, chunk.end_seq);
            }
            if (chunk.end_seq as i64 + chunk.offset_seq) as u64 > ack {
                break;
            }
            seq = (seq as i64 + chunk.wire_len() as i64 + chunk.offset_seq) as u64;
            new_seq = chunk.end_seq;
            fully_acked = idx + 1;
            if ack <= seq {
                break;
            }
        }

        segment.set_ack_no((new_seq as u32).wrapping_add(initial));

        for _ in 0..fully_acked {
            if let Some(chunk) = self.sent.pop_front() {
                self.sent_offset_seq += chunk.offset_seq;
            }
        }
    }

    /* ---------------------------------- cursor engine ---------------------------------- */

    fn chunk_index(&self, id: ChunkId) -> Option<usize> {
        self.pending.iter().position(|chunk| chunk.id == id)
    }

    /// Edit list the cursor currently walks: its chunk's, or the
    /// stream-level pending edit while no chunk is bound.
    fn edits_at(&self, pos: &Position) -> &[Edit] {
        match pos.chunk.and_then(|id| self.chunk_index(id)) {
            Some(idx) => &self.pending[idx].edits,
            None => match &self.pending_edit {
                Some(edit) => std::slice::from_ref(edit),
                None => &[],
            },
        }
    }

    /// Steps the cursor over the trailing edge of its chunk. Succeeds when
    /// the following chunk is contiguous (or the list ends); fails at a gap.
    fn next_chunk(&self, pos: &mut Position) -> bool {
        let idx = match pos.chunk.and_then(|id| self.chunk_index(id)) {
            Some(idx) => idx,
            None => return false,
        };
        let chunk = &self.pending[idx];
        let next = self.pending.get(idx + 1);
        if let Some(next_chunk) = next {
            if next_chunk.start_seq != chunk.end_seq {
                return false;
            }
        }
        pos.chunk = next.map(|chunk| chunk.id);
        pos.chunk_seq += pos.chunk_offset as u64;
        // the cursor sits exactly at the modified-space start of whatever
        // comes next
        pos.chunk_seq_modif = pos.seq_modif;
        pos.chunk_offset = 0;
        pos.edit = EditPos::Front;
        debug_assert!(self.pending_edit.is_none());
        true
    }

    /// Moves the cursor to the next emitable byte: binds it to the head
    /// chunk when it reaches one, applies erased ranges, and crosses chunk
    /// boundaries. Returns `false` when the cursor is stalled at a gap or
    /// the end of the buffered data.
    fn advance(&self, pos: &mut Position) -> bool {
        if pos.chunk.is_none() {
            let binds = matches!(
                self.pending.front(),
                Some(first) if first.start_seq == pos.chunk_seq
            );
            if binds {
                let first = &self.pending[0];
                pos.chunk = Some(first.id);
                pos.chunk_offset = 0;
                pos.chunk_seq_modif = (first.start_seq as i64 + self.first_offset_seq) as u64;
                if first.edits.is_empty() {
                    // nothing to resume if the edit the cursor was parked on
                    // was adopted elsewhere
                    pos.edit = EditPos::Front;
                }
            } else {
                match pos.edit {
                    EditPos::Front => {
                        if self.pending_edit.is_some() {
                            pos.edit = EditPos::At { idx: 0, offset: 0 };
                        } else {
                            return false;
                        }
                    }
                    // already parked on the pending edit
                    _ => {}
                }
            }
        }

        loop {
            match pos.chunk {
                Some(id) => {
                    let idx = match self.chunk_index(id) {
                        Some(idx) => idx,
                        None => return false,
                    };
                    pos.update_edit(&self.pending[idx].edits);
                    if pos.at_chunk_end(&self.pending[idx]) {
                        if idx + 1 >= self.pending.len() || !self.next_chunk(pos) {
                            return false;
                        }
                        continue;
                    }
                }
                None => {
                    let remaining = match (
                        pos.edit,
                        self.pending_edit.as_ref().and_then(|e| e.insert_data()),
                    ) {
                        (EditPos::At { offset, .. }, Some(data)) => offset < data.len(),
                        _ => false,
                    };
                    if !remaining {
                        return false;
                    }
                }
            }

            match pos.edit_slot(self.edits_at(pos)) {
                EditSlot::Current { idx, offset: _ } => match &self.edits_at(pos)[idx] {
                    Edit::Erase { len, .. } => {
                        pos.chunk_offset += len;
                        pos.edit = EditPos::Past { idx };
                    }
                    Edit::Insert { .. } => break,
                },
                EditSlot::Between { .. } => break,
            }
        }
        true
    }

    /// Copies the next contiguous run of bytes at `pos`: the inside of an
    /// insert, or original payload up to the next edit or chunk end. `None`
    /// means the cursor is stalled.
    fn read_step(&self, pos: &mut Position, data: &mut [u8]) -> Option<usize> {
        if !self.advance(pos) {
            return None;
        }
        match pos.edit_slot(self.edits_at(pos)) {
            EditSlot::Current { idx, offset } => {
                // advance never rests on an unapplied erase
                let bytes = self.edits_at(pos)[idx].insert_data()?;
                let n = cmp::min(data.len(), bytes.len() - offset);
                data[..n].copy_from_slice(&bytes[offset..offset + n]);
                pos.edit = EditPos::At {
                    idx,
                    offset: offset + n,
                };
                pos.seq_modif += n as u64;
                Some(n)
            }
            EditSlot::Between { splice_idx } => {
                let chunk_idx = pos.chunk.and_then(|id| self.chunk_index(id))?;
                let chunk = &self.pending[chunk_idx];
                let limit = match chunk.edits.get(splice_idx) {
                    Some(edit) => edit.at(),
                    None => chunk.wire_len(),
                };
                let n = cmp::min(data.len(), limit - pos.chunk_offset);
                data[..n].copy_from_slice(&chunk.payload()[pos.chunk_offset..pos.chunk_offset + n]);
                pos.chunk_offset += n;
                pos.seq_modif += n as u64;
                Some(n)
            }
        }
    }

    fn read_at(&self, pos: &mut Position, data: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < data.len() {
            match self.read_step(pos, &mut data[filled..]) {
                Some(n) => filled += n,
                None => break,
            }
        }
        filled
    }

    /// Counting variant of the read loop: walks `pos` past every readable
    /// byte without copying.
    fn skip_available(&self, pos: &mut Position) -> usize {
        let mut total = 0usize;
        loop {
            if !self.advance(pos) {
                break;
            }
            let skipped = match pos.chunk.and_then(|id| self.chunk_index(id)) {
                Some(idx) => {
                    let chunk = &self.pending[idx];
                    let consumed = pos.seq_modif.saturating_sub(pos.chunk_seq_modif) as usize;
                    pos.chunk_offset = chunk.wire_len();
                    pos.edit = match chunk.edits.len() {
                        0 => EditPos::Front,
                        n => EditPos::Past { idx: n - 1 },
                    };
                    chunk.modified_len().saturating_sub(consumed)
                }
                None => match (
                    pos.edit,
                    self.pending_edit.as_ref().and_then(|e| e.insert_data()),
                ) {
                    (EditPos::At { idx, offset }, Some(data)) => {
                        pos.edit = EditPos::Past { idx };
                        data.len() - offset
                    }
                    _ => break,
                },
            };
            pos.seq_modif += skipped as u64;
            total += skipped;
        }
        total
    }

    /// Steps `pos` off chunk `id` if it has consumed it entirely.
    fn try_advance_chunk(&self, pos: &mut Position, id: ChunkId) {
        if pos.chunk != Some(id) {
            return;
        }
        if let Some(idx) = self.chunk_index(id) {
            if pos.at_chunk_end(&self.pending[idx]) {
                self.next_chunk(pos);
            }
        }
    }

    /* ---------------------------------- edits ---------------------------------- */

    /// Erases one contiguous run at the read cursor: bytes remaining in the
    /// insert the cursor is inside, or original payload up to the next edit
    /// or chunk end. Returns 0 when the cursor is stalled.
    fn erase_step(&mut self, length: usize) -> usize {
        let mut pos = self.current;
        if !self.advance(&mut pos) {
            self.current = pos;
            return 0;
        }

        let erased = match pos.chunk.and_then(|id| self.chunk_index(id)) {
            None => self.erase_pending_step(&mut pos, length),
            Some(chunk_idx) => {
                let slot = pos.edit_slot(&self.pending[chunk_idx].edits);
                match slot {
                    EditSlot::Current { idx, offset } => {
                        self.erase_insert_step(&mut pos, chunk_idx, idx, offset, length)
                    }
                    EditSlot::Between { splice_idx } => {
                        let chunk = &mut self.pending[chunk_idx];
                        let limit = match chunk.edits.get(splice_idx) {
                            Some(edit) => edit.at(),
                            None => chunk.wire_len(),
                        };
                        let erased = cmp::min(limit - pos.chunk_offset, length);
                        chunk.edits.insert(
                            splice_idx,
                            Edit::Erase {
                                at: pos.chunk_offset,
                                len: erased,
                            },
                        );
                        chunk.offset_seq -= erased as i64;
                        pos.edit = EditPos::Past { idx: splice_idx };
                        pos.chunk_offset += erased;
                        erased
                    }
                }
            }
        };
        self.current = pos;
        erased
    }

    /// Erase inside the insert record at `edit_idx`, starting `offset` bytes
    /// in. Shrinks the record, or removes it when nothing remains.
    fn erase_insert_step(
        &mut self,
        pos: &mut Position,
        chunk_idx: usize,
        edit_idx: usize,
        offset: usize,
        length: usize,
    ) -> usize {
        let chunk = &mut self.pending[chunk_idx];
        let insert_len = match &chunk.edits[edit_idx] {
            Edit::Insert { data, .. } => data.len(),
            // advance never rests on an unapplied erase
            Edit::Erase { .. } => return 0,
        };
        let erased = cmp::min(insert_len - offset, length);

        if insert_len == erased {
            chunk.edits.remove(edit_idx);
            pos.edit = match edit_idx {
                0 => EditPos::Front,
                idx => EditPos::Past { idx: idx - 1 },
            };
            let chunk_id = chunk.id;
            let reset = pos.edit;
            if let Some(mark) = self.mark.as_mut() {
                if mark.chunk == Some(chunk_id) {
                    mark.edit = match mark.edit {
                        EditPos::At { idx, offset } if idx > edit_idx => EditPos::At {
                            idx: idx - 1,
                            offset,
                        },
                        EditPos::Past { idx } if idx > edit_idx => {
                            EditPos::Past { idx: idx - 1 }
                        }
                        EditPos::At { idx, .. } if idx == edit_idx => reset,
                        EditPos::Past { idx } if idx == edit_idx => reset,
                        other => other,
                    };
                }
            }
        } else if let Edit::Insert { data, .. } = &mut chunk.edits[edit_idx] {
            data.drain(offset..offset + erased);
        }
        self.pending[chunk_idx].offset_seq -= erased as i64;
        erased
    }

    /// Erase inside the stream-level pending insert (reachable only after a
    /// rewind into it).
    fn erase_pending_step(&mut self, pos: &mut Position, length: usize) -> usize {
        let offset = match pos.edit {
            EditPos::At { offset, .. } => offset,
            _ => return 0,
        };
        let insert_len = match self.pending_edit.as_ref().and_then(|e| e.insert_data()) {
            Some(data) => data.len(),
            None => return 0,
        };
        let erased = cmp::min(insert_len - offset, length);
        if insert_len == erased {
            self.pending_edit = None;
            pos.edit = EditPos::Front;
        } else if let Some(Edit::Insert { data, .. }) = self.pending_edit.as_mut() {
            data.drain(offset..offset + erased);
        }
        erased
    }
}

impl Default for TcpStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream for TcpStream {
    fn read(&mut self, data: &mut [u8]) -> usize {
        let mut pos = self.current;
        let filled = self.read_at(&mut pos, data);
        self.current = pos;
        filled
    }

    fn available(&self) -> usize {
        let mut pos = self.current;
        self.skip_available(&mut pos)
    }

    fn insert(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        if self.passthrough {
            return Err(StreamError::ReadOnly);
        }
        let mut pos = self.current;
        self.advance(&mut pos);

        match pos.chunk.and_then(|id| self.chunk_index(id)) {
            None => {
                if let Some(Edit::Insert { data: pending, .. }) = self.pending_edit.as_mut() {
                    // extend the pending insert; the new bytes land at its
                    // front (see DESIGN.md)
                    let mut merged = Vec::with_capacity(data.len() + pending.len());
                    merged.extend_from_slice(data);
                    merged.append(pending);
                    *pending = merged;
                } else {
                    self.pending_edit = Some(Edit::Insert {
                        at: 0,
                        data: data.to_vec(),
                    });
                }
                pos.edit = EditPos::At {
                    idx: 0,
                    offset: data.len(),
                };
            }
            Some(chunk_idx) => {
                let slot = pos.edit_slot(&self.pending[chunk_idx].edits);
                let chunk = &mut self.pending[chunk_idx];
                match slot {
                    EditSlot::Current { idx, offset } => {
                        debug_assert!(matches!(chunk.edits[idx], Edit::Insert { .. }));
                        if let Edit::Insert { data: existing, .. } = &mut chunk.edits[idx] {
                            let mut merged =
                                Vec::with_capacity(existing.len() + data.len());
                            merged.extend_from_slice(&existing[..offset]);
                            merged.extend_from_slice(data);
                            merged.extend_from_slice(&existing[offset..]);
                            *existing = merged;
                        }
                        chunk.offset_seq += data.len() as i64;
                        pos.edit = EditPos::At {
                            idx,
                            offset: offset + data.len(),
                        };
                    }
                    EditSlot::Between { splice_idx } => {
                        chunk.edits.insert(
                            splice_idx,
                            Edit::Insert {
                                at: pos.chunk_offset,
                                data: data.to_vec(),
                            },
                        );
                        chunk.offset_seq += data.len() as i64;
                        pos.edit = EditPos::At {
                            idx: splice_idx,
                            offset: data.len(),
                        };
                    }
                }
            }
        }
        pos.seq_modif += data.len() as u64;
        self.current = pos;
        Ok(data.len())
    }

    fn replace(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        let inserted = self.insert(data)?;
        self.erase(data.len())?;
        Ok(inserted)
    }

    fn erase(&mut self, length: usize) -> Result<usize, StreamError> {
        if self.passthrough {
            return Err(StreamError::ReadOnly);
        }
        let mut total = 0;
        while total < length {
            let erased = self.erase_step(length - total);
            if erased == 0 {
                break;
            }
            total += erased;
        }
        Ok(total)
    }

    fn mark(&mut self) {
        self.mark = Some(self.current);
    }

    fn unmark(&mut self) -> Result<(), StreamError> {
        match self.mark.take() {
            Some(_) => Ok(()),
            None => Err(StreamError::NotMarked),
        }
    }

    fn rewind(&mut self) -> Result<(), StreamError> {
        match self.mark.take() {
            Some(mark) => {
                self.current = mark;
                Ok(())
            }
            None => Err(StreamError::NotMarked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{ACK, SYN};
    use std::net::SocketAddr;

    fn endpoints() -> (SocketAddr, SocketAddr) {
        (
            "10.0.0.1:43210".parse().unwrap(),
            "10.0.0.2:80".parse().unwrap(),
        )
    }

    fn syn(seq: u32) -> TcpSegment {
        let (src, dst) = endpoints();
        TcpSegment::new(src, dst, seq, SYN, vec![])
    }

    fn data(seq: u32, payload: &[u8]) -> TcpSegment {
        let (src, dst) = endpoints();
        TcpSegment::new(src, dst, seq, ACK, payload.to_vec())
    }

    fn reverse_ack(ack_no: u32) -> TcpSegment {
        let (src, dst) = endpoints();
        let mut segment = TcpSegment::new(dst, src, 9000, ACK, vec![]);
        segment.set_ack_no(ack_no);
        segment
    }

    /// Stream whose initial data sequence number is 1001.
    fn stream() -> TcpStream {
        let mut s = TcpStream::new();
        s.push(syn(1000)).unwrap();
        s
    }

    fn read_n(s: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        let got = s.read(&mut buf);
        buf.truncate(got);
        buf
    }

    #[test]
    fn data_before_syn_rejected() {
        let mut s = TcpStream::new();
        let err = s.push(data(1001, b"HELLO")).unwrap_err();
        assert_eq!(err.reason, StreamError::InvalidStream);
        assert_eq!(err.segment.payload(), b"HELLO");
    }

    #[test]
    fn sequence_below_initial_rejected() {
        let mut s = stream();
        let err = s.push(data(500, b"X")).unwrap_err();
        assert_eq!(
            err.reason,
            StreamError::InvalidSeq {
                seq: 500,
                initial: 1001
            }
        );
        assert_eq!(err.to_string(), "invalid sequence number: 500 < 1001");
    }

    #[test]
    fn syn_retransmit_keeps_first_initial_sequence() {
        let mut s = stream();
        let fwd = s.push(syn(5000)).unwrap();
        assert!(fwd.is_some());
        assert!(s.push(data(1001, b"A")).unwrap().is_none());
        assert_eq!(s.pending[0].start_seq, 0);
    }

    #[test]
    fn roundtrip_without_edits() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        assert_eq!(read_n(&mut s, 5), b"HELLO");

        let out = s.pop().unwrap();
        assert_eq!(out.seq_no(), 1001);
        assert_eq!(out.payload(), b"HELLO");
        assert!(s.pop().is_none());
    }

    #[test]
    fn insert_mid_segment() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        assert_eq!(read_n(&mut s, 2), b"HE");
        assert_eq!(s.insert(b"XY"), Ok(2));
        assert_eq!(read_n(&mut s, 8), b"LLO");

        let out = s.pop().unwrap();
        assert_eq!(out.seq_no(), 1001);
        assert_eq!(out.payload(), b"HEXYLLO");

        // the next emission inherits the +2 shift
        s.push(data(1006, b"AB")).unwrap();
        let out = s.pop().unwrap();
        assert_eq!(out.seq_no(), 1008);
        assert_eq!(out.payload(), b"AB");
    }

    #[test]
    fn erase_at_front_shifts_following_segments() {
        let mut s = stream();
        s.push(data(1001, b"ABCDEF")).unwrap();
        assert_eq!(s.erase(2), Ok(2));

        let out = s.pop().unwrap();
        assert_eq!(out.seq_no(), 1001);
        assert_eq!(out.payload(), b"CDEF");

        s.push(data(1007, b"GHI")).unwrap();
        let out = s.pop().unwrap();
        assert_eq!(out.seq_no(), 1005);
        assert_eq!(out.payload(), b"GHI");
    }

    #[test]
    fn mark_rewind_rereads_edited_bytes() {
        let mut s = stream();
        s.push(data(1001, b"ABCDEF")).unwrap();
        s.mark();
        assert_eq!(read_n(&mut s, 3), b"ABC");
        assert_eq!(s.insert(b"ZZ"), Ok(2));
        assert_eq!(read_n(&mut s, 1), b"D");
        s.rewind().unwrap();
        assert_eq!(read_n(&mut s, 6), b"ABCZZD");

        let out = s.pop().unwrap();
        assert_eq!(out.payload(), b"ABCZZDEF");
        assert_eq!(out.seq_no(), 1001);
    }

    #[test]
    fn contiguous_segments_read_as_one_stream() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        s.push(data(1006, b"WORLD")).unwrap();
        assert_eq!(s.available(), 10);
        assert_eq!(read_n(&mut s, 10), b"HELLOWORLD");

        let a = s.pop().unwrap();
        assert_eq!((a.seq_no(), a.payload()), (1001, &b"HELLO"[..]));
        let b = s.pop().unwrap();
        assert_eq!((b.seq_no(), b.payload()), (1006, &b"WORLD"[..]));
    }

    #[test]
    fn out_of_order_segments_are_ordered() {
        let mut s = stream();
        s.push(data(1006, b"WORLD")).unwrap();
        s.push(data(1001, b"HELLO")).unwrap();

        for pair in s.pending.iter().zip(s.pending.iter().skip(1)) {
            assert!(pair.0.start_seq < pair.1.start_seq);
            assert!(pair.0.end_seq <= pair.1.start_seq);
        }
        assert_eq!(read_n(&mut s, 10), b"HELLOWORLD");
    }

    #[test]
    fn gap_blocks_reading_and_emission() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        s.push(data(1011, b"XY")).unwrap();

        assert_eq!(s.available(), 5);
        assert_eq!(read_n(&mut s, 10), b"HELLO");

        // the cursor cannot step off the head chunk while the gap remains,
        // so nothing is emitted yet
        assert!(s.pop().is_none());
        assert_eq!(s.pending_segments(), 2);

        s.push(data(1006, b"WORLD")).unwrap();
        assert_eq!(s.pop().unwrap().payload(), b"HELLO");
        assert_eq!(s.pop().unwrap().payload(), b"WORLD");
        let tail = s.pop().unwrap();
        assert_eq!(tail.payload(), b"XY");
        assert_eq!(tail.seq_no(), 1011);
    }

    #[test]
    fn duplicate_segment_rejected() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        let err = s.push(data(1001, b"HELLO")).unwrap_err();
        assert_eq!(err.reason, StreamError::Retransmit);
        assert_eq!(err.to_string(), "retransmit packet (unsupported)");
    }

    #[test]
    fn segment_behind_read_cursor_rejected() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        assert_eq!(read_n(&mut s, 5), b"HELLO");
        s.pop().unwrap();

        let err = s.push(data(1003, b"LO")).unwrap_err();
        assert_eq!(err.reason, StreamError::Retransmit);
    }

    #[test]
    fn replace_swaps_bytes_in_place() {
        let mut s = stream();
        s.push(data(1001, b"ABCDEF")).unwrap();
        assert_eq!(read_n(&mut s, 2), b"AB");
        assert_eq!(s.replace(b"XY"), Ok(2));
        assert_eq!(read_n(&mut s, 4), b"EF");

        let out = s.pop().unwrap();
        assert_eq!(out.payload(), b"ABXYEF");

        // net length delta is zero, later emissions are unshifted
        s.push(data(1007, b"G")).unwrap();
        assert_eq!(s.pop().unwrap().seq_no(), 1007);
    }

    #[test]
    fn insert_then_full_erase_is_neutral() {
        let mut s = stream();
        s.push(data(1001, b"ABCDEF")).unwrap();
        assert_eq!(read_n(&mut s, 2), b"AB");
        let before = s.available();

        s.mark();
        assert_eq!(s.insert(b"XY"), Ok(2));
        s.rewind().unwrap();
        assert_eq!(s.erase(2), Ok(2));

        assert_eq!(s.available(), before);
        assert_eq!(s.pending[0].offset_seq, 0);
        assert!(s.pending[0].edits.is_empty());
        assert_eq!(read_n(&mut s, 4), b"CDEF");
        assert_eq!(s.pop().unwrap().payload(), b"ABCDEF");
    }

    #[test]
    fn erase_shrinks_insert_then_payload() {
        let mut s = stream();
        s.push(data(1001, b"ABCDEF")).unwrap();
        assert_eq!(read_n(&mut s, 2), b"AB");
        s.mark();
        assert_eq!(s.insert(b"WXYZ"), Ok(4));
        s.rewind().unwrap();
        assert_eq!(read_n(&mut s, 2), b"WX");

        // drops "YZ" from the insert, then "CD" from the payload
        assert_eq!(s.erase(4), Ok(4));
        assert_eq!(read_n(&mut s, 8), b"EF");
        assert_eq!(s.pop().unwrap().payload(), b"ABWXEF");
    }

    #[test]
    fn erase_spans_segments() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        s.push(data(1006, b"WORLD")).unwrap();
        assert_eq!(s.erase(7), Ok(7));
        assert_eq!(read_n(&mut s, 8), b"RLD");

        let a = s.pop().unwrap();
        assert_eq!(a.payload(), b"");
        assert_eq!(a.seq_no(), 1001);
        let b = s.pop().unwrap();
        assert_eq!(b.payload(), b"RLD");
        assert_eq!(b.seq_no(), 1001);
    }

    #[test]
    fn erase_reports_short_count_at_gap() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        s.push(data(1011, b"XY")).unwrap();
        assert_eq!(s.erase(10), Ok(5));
    }

    #[test]
    fn insert_before_first_segment_is_adopted() {
        let mut s = stream();
        assert_eq!(s.insert(b"HI"), Ok(2));
        assert_eq!(s.available(), 0);

        s.push(data(1001, b"THERE")).unwrap();
        assert_eq!(read_n(&mut s, 8), b"THERE");

        let out = s.pop().unwrap();
        assert_eq!(out.payload(), b"HITHERE");
        assert_eq!(out.seq_no(), 1001);

        s.push(data(1006, b"!")).unwrap();
        assert_eq!(s.pop().unwrap().seq_no(), 1008);
    }

    #[test]
    fn pending_insert_extension_splices_at_front() {
        let mut s = stream();
        assert_eq!(s.insert(b"AB"), Ok(2));
        assert_eq!(s.insert(b"CD"), Ok(2));

        // extending re-exposes the first insert's bytes behind the cursor
        assert_eq!(read_n(&mut s, 4), b"AB");

        s.push(data(1001, b"X")).unwrap();
        let out = s.pop().unwrap();
        assert_eq!(out.payload(), b"CDABX");
    }

    #[test]
    fn available_does_not_move_the_cursor() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        assert_eq!(s.available(), 5);
        assert_eq!(s.available(), 5);
        assert_eq!(read_n(&mut s, 5), b"HELLO");
        assert_eq!(s.available(), 0);
    }

    #[test]
    fn held_mark_blocks_emission() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        s.mark();
        assert_eq!(read_n(&mut s, 5), b"HELLO");
        assert!(s.pop().is_none());

        s.unmark().unwrap();
        assert!(s.pop().is_some());
    }

    #[test]
    fn mark_rewind_rereads_identically() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        s.push(data(1006, b"WORLD")).unwrap();

        s.mark();
        let first = read_n(&mut s, 7);
        s.rewind().unwrap();
        let second = read_n(&mut s, 7);
        assert_eq!(first, second);
        assert_eq!(first, b"HELLOWO");
    }

    #[test]
    fn unmark_and_rewind_require_a_mark() {
        let mut s = stream();
        assert_eq!(s.unmark(), Err(StreamError::NotMarked));
        assert_eq!(s.rewind(), Err(StreamError::NotMarked));
        assert_eq!(
            StreamError::NotMarked.to_string(),
            "stream was not marked"
        );

        s.mark();
        assert_eq!(s.unmark(), Ok(()));
        assert_eq!(s.unmark(), Err(StreamError::NotMarked));
    }

    #[test]
    fn read_position_is_monotonic() {
        let mut s = stream();
        s.push(data(1001, b"ABCDEF")).unwrap();
        let mut last = s.current.seq_modif;
        read_n(&mut s, 2);
        assert!(s.current.seq_modif >= last);
        last = s.current.seq_modif;
        s.insert(b"XY").unwrap();
        assert!(s.current.seq_modif >= last);
        last = s.current.seq_modif;
        s.erase(1).unwrap();
        assert!(s.current.seq_modif >= last);
        last = s.current.seq_modif;
        read_n(&mut s, 3);
        assert!(s.current.seq_modif >= last);
    }

    #[test]
    fn mark_never_passes_the_read_cursor() {
        let mut s = stream();
        s.push(data(1001, b"ABCDEF")).unwrap();
        s.mark();
        read_n(&mut s, 3);
        s.insert(b"QQ").unwrap();
        read_n(&mut s, 1);
        let mark = s.mark.unwrap();
        assert!(mark.seq_modif <= s.current.seq_modif);
    }

    #[test]
    fn chunk_delta_matches_edit_sum() {
        let mut s = stream();
        s.push(data(1001, b"ABCDEF")).unwrap();
        read_n(&mut s, 1);
        s.insert(b"XYZ").unwrap();
        read_n(&mut s, 2);
        s.erase(2).unwrap();

        let chunk = &s.pending[0];
        let delta: i64 = chunk.edits.iter().map(Edit::len_delta).sum();
        assert_eq!(delta, chunk.offset_seq);
        assert_eq!(chunk.offset_seq, 1);
    }

    #[test]
    fn ack_translation_is_identity_without_edits() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        s.pop().unwrap();

        let mut rev = reverse_ack(1006);
        s.ack(&mut rev);
        assert_eq!(rev.ack_no(), 1006);
    }

    #[test]
    fn ack_translation_restores_original_space() {
        let mut s = stream();
        s.push(data(1001, b"ABCDEF")).unwrap();
        s.erase(2).unwrap();
        s.pop().unwrap();
        s.push(data(1007, b"GHI")).unwrap();
        s.pop().unwrap();

        // the peer has seen "CDEF" at 1001..1005 and "GHI" at 1005..1008;
        // acking 1008 maps back to the edited segment's original end
        let mut rev = reverse_ack(1008);
        s.ack(&mut rev);
        assert_eq!(rev.ack_no(), 1007);

        // repeated acknowledgement translates identically after trimming
        let mut dup = reverse_ack(1008);
        s.ack(&mut dup);
        assert_eq!(dup.ack_no(), 1007);
    }

    #[test]
    fn ack_inside_a_chunk_snaps_to_its_start() {
        let mut s = stream();
        s.push(data(1001, b"HELLO")).unwrap();
        s.pop().unwrap();

        let mut rev = reverse_ack(1003);
        s.ack(&mut rev);
        assert_eq!(rev.ack_no(), 1001);
    }

    #[test]
    fn ack_without_sent_history_is_untouched() {
        let mut s = stream();
        let mut rev = reverse_ack(1234);
        s.ack(&mut rev);
        assert_eq!(rev.ack_no(), 1234);
    }

    #[test]
    fn passthrough_streams_are_read_only() {
        let config = StreamConfig {
            passthrough: true,
            ..StreamConfig::default()
        };
        let mut s = TcpStream::with_config(&config);
        s.push(syn(1000)).unwrap();
        s.push(data(1001, b"HELLO")).unwrap();

        assert_eq!(s.insert(b"X"), Err(StreamError::ReadOnly));
        assert_eq!(s.erase(1), Err(StreamError::ReadOnly));
        assert_eq!(s.replace(b"X"), Err(StreamError::ReadOnly));
        assert_eq!(read_n(&mut s, 5), b"HELLO");
        assert_eq!(s.pop().unwrap().payload(), b"HELLO");
    }

    #[test]
    fn pending_limit_bounds_the_queue() {
        let config = StreamConfig {
            max_pending: 2,
            ..StreamConfig::default()
        };
        let mut s = TcpStream::with_config(&config);
        s.push(syn(1000)).unwrap();
        s.push(data(1001, b"AA")).unwrap();
        s.push(data(1003, b"BB")).unwrap();
        let err = s.push(data(1005, b"CC")).unwrap_err();
        assert_eq!(err.reason, StreamError::PendingOverflow);
    }
}
