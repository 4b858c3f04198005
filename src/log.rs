//! The replicated log: a growable ring buffer with snapshot compaction.

use std::collections::VecDeque;
use std::error::Error;

use validit::Validate;

use crate::entry::Entry;
use crate::entry::EntryKind;
use crate::error::RaftError;
use crate::host::RaftHost;
use crate::raft_types::LogIndex;
use crate::raft_types::Term;

/// An ordered, 1-indexed sequence of entries holding indices
/// `(base, base + count]`.
///
/// `base` is the index of the last entry covered by the latest snapshot
/// prefix; it only advances via [`Log::poll_to`] once a snapshot is
/// finalized. The ring never reorders entries and never mutates an entry
/// in place after append.
///
/// Every mutation is mirrored to the host *before* the log reports it:
/// [`RaftHost::log_offer`] on append, [`RaftHost::log_pop`] on tail
/// truncation (in reverse order of offer), [`RaftHost::log_poll`] on
/// prefix removal (in increasing index order). Host callbacks always see
/// contiguous entry ranges, batched across the ring wrap.
#[derive(Clone, Debug, Default)]
pub struct Log {
    entries: VecDeque<Entry>,
    base: LogIndex,
    base_term: Term,
}

impl Validate for Log {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if let (Some(first), Some(last)) = (self.entries.front(), self.entries.back()) {
            validit::less_equal!(self.base_term, first.term);
            validit::less_equal!(first.term, last.term);
        }
        Ok(())
    }
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held (compacted entries excluded).
    pub fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Index of the last entry covered by the latest snapshot prefix.
    pub fn base(&self) -> LogIndex {
        self.base
    }

    /// Term recorded for the snapshot prefix ending at `base`.
    pub fn base_term(&self) -> Term {
        self.base_term
    }

    /// Index of the youngest entry, or `base` when the window is empty.
    pub fn current_idx(&self) -> LogIndex {
        self.base + self.entries.len() as u64
    }

    /// The youngest entry.
    pub fn peek_tail(&self) -> Option<&Entry> {
        self.entries.back()
    }

    /// Random access. Out-of-window reads return `None`.
    pub fn entry_at(&self, idx: LogIndex) -> Option<&Entry> {
        if idx <= self.base || self.current_idx() < idx {
            return None;
        }
        self.entries.get((idx - self.base - 1) as usize)
    }

    /// Bulk read from `idx` onwards.
    ///
    /// The returned slice is contiguous in memory and may stop short of
    /// the tail at the ring wrap; call again with the next index for the
    /// rest. Out-of-window reads return an empty slice.
    pub fn entries_from(&self, idx: LogIndex) -> &[Entry] {
        if idx <= self.base || self.current_idx() < idx {
            return &[];
        }
        let offset = (idx - self.base - 1) as usize;
        let (front, back) = self.entries.as_slices();
        if offset < front.len() {
            &front[offset..]
        } else {
            &back[offset - front.len()..]
        }
    }

    /// The term of the entry at `idx`, or the base term at `base`.
    pub fn term_at(&self, idx: LogIndex) -> Option<Term> {
        if idx == self.base {
            return Some(self.base_term);
        }
        self.entry_at(idx).map(|ety| ety.term)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.base = 0;
        self.base_term = 0;
    }

    /// Append `entries` at the tail, offering them to the host first.
    ///
    /// Returns the number actually appended: the host may accept only a
    /// prefix. A host error appends nothing.
    pub(crate) fn append<H: RaftHost>(&mut self, host: &mut H, entries: Vec<Entry>) -> Result<usize, RaftError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let first_idx = self.current_idx() + 1;
        let accepted = host.log_offer(&entries, first_idx)?;
        debug_assert!(accepted <= entries.len());
        let accepted = accepted.min(entries.len());

        for ety in entries.into_iter().take(accepted) {
            self.entries.push_back(ety);
        }
        Ok(accepted)
    }

    /// Remove all entries with index `>= idx` from the tail.
    ///
    /// `log_pop` is invoked per contiguous batch in reverse index order.
    /// The removed entries are returned in ascending order so the caller
    /// can unwind their side effects tail-first.
    pub(crate) fn truncate_from<H: RaftHost>(
        &mut self,
        host: &mut H,
        idx: LogIndex,
    ) -> Result<Vec<Entry>, RaftError> {
        if idx <= self.base || self.current_idx() < idx {
            return Err(RaftError::InvalidIndex(idx));
        }

        let offset = (idx - self.base - 1) as usize;
        let (front, back) = self.entries.as_slices();
        if offset < front.len() {
            if !back.is_empty() {
                host.log_pop(back, self.base + 1 + front.len() as u64)?;
            }
            host.log_pop(&front[offset..], idx)?;
        } else {
            host.log_pop(&back[offset - front.len()..], idx)?;
        }

        let removed = self.entries.split_off(offset);
        Ok(removed.into_iter().collect())
    }

    /// Remove the prefix up to and including `idx` from the head.
    ///
    /// `log_poll` is invoked per contiguous batch in increasing index
    /// order; `base` advances to `idx` and `base_term` records the last
    /// polled term. Returns the number of entries removed.
    pub(crate) fn poll_to<H: RaftHost>(&mut self, host: &mut H, idx: LogIndex) -> Result<u64, RaftError> {
        if idx <= self.base || self.current_idx() < idx {
            return Err(RaftError::InvalidIndex(idx));
        }

        let n = (idx - self.base) as usize;
        let (front, back) = self.entries.as_slices();
        let in_front = n.min(front.len());
        host.log_poll(&front[..in_front], self.base + 1)?;
        if n > front.len() {
            host.log_poll(&back[..n - front.len()], self.base + 1 + front.len() as u64)?;
        }

        self.base_term = self.entries[n - 1].term;
        self.entries.drain(..n);
        self.base = idx;
        Ok(n as u64)
    }

    /// Reset the log to the state right after installing a snapshot that
    /// covers everything up to and including `idx`.
    ///
    /// The window becomes `base = idx - 1` with a single placeholder entry
    /// at `idx` carrying `term`, so that up-to-dateness comparisons keep
    /// working.
    pub(crate) fn load_from_snapshot<H: RaftHost>(
        &mut self,
        host: &mut H,
        idx: LogIndex,
        term: Term,
    ) -> Result<(), RaftError> {
        debug_assert!(0 < idx);

        self.clear();
        self.base = idx - 1;
        self.base_term = term;

        let seed = Entry {
            term,
            id: 1,
            kind: EntryKind::NoopSnapshot,
            data: Vec::new(),
        };
        let accepted = host.log_offer(std::slice::from_ref(&seed), idx)?;
        if accepted != 1 {
            return Err(RaftError::Shutdown);
        }
        self.entries.push_back(seed);
        Ok(())
    }
}
