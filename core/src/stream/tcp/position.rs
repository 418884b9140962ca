//! Cursors over the editable stream.

use super::chunk::{Chunk, ChunkId, Edit};

/// Progress of a cursor through its chunk's edit list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EditPos {
    /// No edit of this chunk reached yet.
    Front,
    /// On `edits[idx]`: `offset` bytes of an insert consumed, or an erase
    /// not yet applied (`offset == 0`).
    At { idx: usize, offset: usize },
    /// Every edit up to and including `edits[idx]` consumed.
    Past { idx: usize },
}

/// Where a cursor stands relative to its chunk's edit list: on a live edit,
/// or between edits at the point where a new edit would splice in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EditSlot {
    Current { idx: usize, offset: usize },
    Between { splice_idx: usize },
}

/// A logical position in the stream.
///
/// A cursor binds to chunks by id, with the chunk's original-space start
/// cached in `chunk_seq`; while unbound, `chunk_seq` is the position the
/// cursor will bind at when a matching chunk reaches the head of the
/// pending list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Position {
    /// Original-space start of the current chunk (or of the chunk the
    /// cursor will bind to next).
    pub(crate) chunk_seq: u64,
    /// Modified-space start of the current chunk.
    pub(crate) chunk_seq_modif: u64,
    /// The observable read position in modified space.
    pub(crate) seq_modif: u64,
    /// Chunk the cursor is inside, if bound. An unbound cursor whose `edit`
    /// is not [`EditPos::Front`] refers to the stream's pending edit.
    pub(crate) chunk: Option<ChunkId>,
    /// Offset into the current chunk's original payload.
    pub(crate) chunk_offset: usize,
    /// Relation to the chunk's edit list.
    pub(crate) edit: EditPos,
}

impl Position {
    pub(crate) fn start() -> Self {
        Position {
            chunk_seq: 0,
            chunk_seq_modif: 0,
            seq_modif: 0,
            chunk: None,
            chunk_offset: 0,
            edit: EditPos::Front,
        }
    }

    /// The cursor's position in original space.
    #[inline]
    pub(crate) fn origin_seq(&self) -> u64 {
        self.chunk_seq + self.chunk_offset as u64
    }

    /// Returns `true` if the cursor has consumed `chunk` entirely: the
    /// payload offset sits at the trailing edge and no edit of the chunk
    /// still has bytes or an unapplied erase.
    pub(crate) fn at_chunk_end(&self, chunk: &Chunk) -> bool {
        if chunk.start_seq + self.chunk_offset as u64 != chunk.end_seq {
            return false;
        }
        let (idx, consumed) = match self.edit {
            EditPos::Front => {
                if chunk.edits.is_empty() {
                    return true;
                }
                (0, true)
            }
            EditPos::At { idx, offset } => (idx, edit_consumed(&chunk.edits[idx], offset)),
            EditPos::Past { idx } => (idx, true),
        };
        if idx + 1 < chunk.edits.len() {
            return false;
        }
        chunk.edits[idx].at() != self.chunk_offset || consumed
    }

    /// Returns `true` if the cursor is strictly past `chunk`.
    #[inline]
    pub(crate) fn is_past_chunk(&self, chunk: &Chunk) -> bool {
        self.chunk != Some(chunk.id) && self.origin_seq() >= chunk.end_seq
    }

    /// Moves the cursor onto the next edit if one anchors at the current
    /// payload offset and the current one (if any) is spent.
    pub(crate) fn update_edit(&mut self, edits: &[Edit]) {
        let candidate = match self.edit {
            EditPos::Front => 0,
            EditPos::At { idx, offset } => {
                let edit = &edits[idx];
                if edit.at() == self.chunk_offset && !edit_consumed(edit, offset) {
                    return;
                }
                idx + 1
            }
            EditPos::Past { idx } => idx + 1,
        };
        if let Some(edit) = edits.get(candidate) {
            debug_assert!(edit.at() >= self.chunk_offset);
            if edit.at() == self.chunk_offset {
                self.edit = EditPos::At {
                    idx: candidate,
                    offset: 0,
                };
            }
        }
    }

    /// Resolves the cursor against `edits`: the live edit it sits on, or the
    /// index where a new edit anchored at the cursor would splice in.
    pub(crate) fn edit_slot(&self, edits: &[Edit]) -> EditSlot {
        match self.edit {
            EditPos::Front => EditSlot::Between { splice_idx: 0 },
            EditPos::At { idx, offset } => {
                let edit = &edits[idx];
                if edit.at() == self.chunk_offset && !edit_consumed(edit, offset) {
                    EditSlot::Current { idx, offset }
                } else {
                    EditSlot::Between {
                        splice_idx: idx + 1,
                    }
                }
            }
            EditPos::Past { idx } => EditSlot::Between {
                splice_idx: idx + 1,
            },
        }
    }
}

/// An insert is consumed when every byte has been read past; an erase is
/// consumed once it has been applied to the cursor.
#[inline]
pub(crate) fn edit_consumed(edit: &Edit, offset: usize) -> bool {
    match edit {
        Edit::Insert { data, .. } => offset >= data.len(),
        Edit::Erase { .. } => offset != 0,
    }
}
