//! Slice bookkeeping.
//!
//! The registry is the single ledger of every slice ever allocated: which
//! ones are held, which are locked as faulty and which were given back. It
//! owns the device handles; a handle leaves the registry only through
//! `reclaim_non_faulty`, and only once.

use crate::error::RegistryError;
use crate::verify::Verdict;

/// Classification state of one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceState {
    /// Allocated and currently being verified.
    InProgress,
    /// Verified stable and still held.
    Ok,
    /// Read instability detected; held until the process exits.
    Faulty,
    /// Returned to the device during the reclaim pass.
    Released,
}

impl SliceState {
    /// Returns the human-readable name of this state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Ok => "ok",
            Self::Faulty => "faulty",
            Self::Released => "released",
        }
    }

    /// Single-character glyph used in the slice map.
    pub fn glyph(&self) -> char {
        match self {
            Self::InProgress => '?',
            Self::Ok => '#',
            Self::Faulty => 'X',
            Self::Released => '.',
        }
    }
}

/// Final classification of a verified slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ok,
    Faulty,
}

impl From<Verdict> for Classification {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Match => Classification::Ok,
            Verdict::Mismatch => Classification::Faulty,
        }
    }
}

/// Number of slices in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceCounts {
    pub ok: usize,
    pub faulty: usize,
    pub in_progress: usize,
    pub released: usize,
}

impl SliceCounts {
    /// Total number of slices ever recorded.
    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.ok + self.faulty + self.in_progress + self.released
    }

    /// Slices whose backing memory is still held.
    pub fn held(&self) -> usize {
        self.ok + self.faulty + self.in_progress
    }

    fn bump(&mut self, state: SliceState) {
        match state {
            SliceState::InProgress => self.in_progress += 1,
            SliceState::Ok => self.ok += 1,
            SliceState::Faulty => self.faulty += 1,
            SliceState::Released => self.released += 1,
        }
    }

    fn drop_one(&mut self, state: SliceState) {
        match state {
            SliceState::InProgress => self.in_progress -= 1,
            SliceState::Ok => self.ok -= 1,
            SliceState::Faulty => self.faulty -= 1,
            SliceState::Released => self.released -= 1,
        }
    }
}

/// Read-only copy of the registry for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Per-slice state, indexed by slice index.
    pub states: Vec<SliceState>,
    pub counts: SliceCounts,
    pub finalized: bool,
}

impl RegistrySnapshot {
    /// Index the next allocated slice would receive.
    pub fn next_index(&self) -> usize {
        self.states.len()
    }
}

struct SliceRecord<H> {
    state: SliceState,
    handle: Option<H>,
}

/// Ordered ledger of slices, generic over the device handle type.
pub struct SliceRegistry<H> {
    slices: Vec<SliceRecord<H>>,
    counts: SliceCounts,
    finalized: bool,
}

impl<H> SliceRegistry<H> {
    pub fn new() -> Self {
        Self {
            slices: Vec::new(),
            counts: SliceCounts::default(),
            finalized: false,
        }
    }

    /// Number of slices ever recorded; also the next index.
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// State of the slice at `index`, if any.
    #[cfg(test)]
    pub fn state(&self, index: usize) -> Option<SliceState> {
        self.slices.get(index).map(|slice| slice.state)
    }

    pub fn counts(&self) -> SliceCounts {
        self.counts
    }

    /// Handle of a slice whose memory is still held.
    pub fn handle(&self, index: usize) -> Option<&H> {
        self.slices.get(index).and_then(|slice| slice.handle.as_ref())
    }

    /// Slices whose handle is still owned by the registry.
    pub fn held_count(&self) -> usize {
        self.slices.iter().filter(|s| s.handle.is_some()).count()
    }

    /// Records a freshly allocated slice as in progress and returns its index.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Finalized` after the reclaim pass, and
    /// `RegistryError::VerificationPending` while another slice is unclassified.
    pub fn record_new(&mut self, handle: H) -> Result<usize, RegistryError> {
        if self.finalized {
            return Err(RegistryError::Finalized);
        }
        if let Some(pending) = self.pending() {
            return Err(RegistryError::VerificationPending { pending });
        }

        let index = self.slices.len();
        self.slices.push(SliceRecord {
            state: SliceState::InProgress,
            handle: Some(handle),
        });
        self.counts.bump(SliceState::InProgress);
        self.debug_check();
        Ok(index)
    }

    /// Classifies an in-progress slice. Classification is write-once.
    pub fn classify(
        &mut self,
        index: usize,
        classification: Classification,
    ) -> Result<(), RegistryError> {
        let len = self.slices.len();
        let slice = self
            .slices
            .get_mut(index)
            .ok_or(RegistryError::OutOfRange { index, len })?;

        if slice.state != SliceState::InProgress {
            return Err(RegistryError::AlreadyClassified {
                index,
                state: slice.state.name(),
            });
        }

        let state = match classification {
            Classification::Ok => SliceState::Ok,
            Classification::Faulty => SliceState::Faulty,
        };
        slice.state = state;
        self.counts.drop_one(SliceState::InProgress);
        self.counts.bump(state);
        self.debug_check();
        Ok(())
    }

    /// Releases every slice that is not faulty and hands back the handles.
    ///
    /// Runs exactly once. Afterwards the registry is finalized and a second
    /// call fails without touching any slice.
    pub fn reclaim_non_faulty(&mut self) -> Result<Vec<H>, RegistryError> {
        if self.finalized {
            return Err(RegistryError::Finalized);
        }
        self.finalized = true;

        let mut released = Vec::new();
        for slice in &mut self.slices {
            if slice.state == SliceState::Faulty {
                continue;
            }
            if let Some(handle) = slice.handle.take() {
                self.counts.drop_one(slice.state);
                self.counts.bump(SliceState::Released);
                slice.state = SliceState::Released;
                released.push(handle);
            }
        }
        self.debug_check();
        Ok(released)
    }

    /// Owned, ordered copy of every slice state plus the counters.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            states: self.slices.iter().map(|s| s.state).collect(),
            counts: self.counts,
            finalized: self.finalized,
        }
    }

    /// Recomputes the counters and checks them against the cached ones, and
    /// checks that handles are present exactly for non-released slices.
    pub fn check_consistency(&self) -> bool {
        let mut recount = SliceCounts::default();
        for slice in &self.slices {
            recount.bump(slice.state);
            if (slice.state == SliceState::Released) == slice.handle.is_some() {
                return false;
            }
        }
        recount == self.counts && recount.in_progress <= 1
    }

    fn pending(&self) -> Option<usize> {
        self.slices
            .iter()
            .rposition(|s| s.state == SliceState::InProgress)
    }

    fn debug_check(&self) {
        debug_assert!(self.check_consistency(), "slice counters out of sync");
    }
}

impl<H> Default for SliceRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
