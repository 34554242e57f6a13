use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who spoke a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptSource {
    User,
    Model,
}

impl TranscriptSource {
    fn slot(self) -> usize {
        match self {
            TranscriptSource::User => 0,
            TranscriptSource::Model => 1,
        }
    }
}

/// One line of the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Monotonic per-log identifier
    pub id: u64,

    pub source: TranscriptSource,

    /// Text accumulated so far
    pub text: String,

    /// Still being extended by deltas
    pub is_partial: bool,

    /// When the entry was created
    pub timestamp: DateTime<Utc>,
}

/// Append-only conversation log built from streamed deltas.
///
/// Each source has at most one partial entry at a time. A delta for a source
/// with a partial entry extends that entry in place; otherwise a new partial
/// entry is appended. [`complete_turn`](Self::complete_turn) freezes the
/// partial entries of the finished turn.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    entries: Vec<TranscriptEntry>,
    /// Index of the open partial entry per source
    open: [Option<usize>; 2],
    next_id: u64,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta; returns the entry it landed in
    pub fn append_delta(&mut self, source: TranscriptSource, text: &str) -> &TranscriptEntry {
        let slot = source.slot();

        let idx = match self.open[slot] {
            Some(idx) => {
                self.entries[idx].text.push_str(text);
                idx
            }
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.entries.push(TranscriptEntry {
                    id,
                    source,
                    text: text.to_string(),
                    is_partial: true,
                    timestamp: Utc::now(),
                });
                let idx = self.entries.len() - 1;
                self.open[slot] = Some(idx);
                idx
            }
        };

        &self.entries[idx]
    }

    /// Finalize the partial entries of the just-finished turn.
    ///
    /// Returns how many entries were finalized (0, 1 or 2).
    pub fn complete_turn(&mut self) -> usize {
        let mut finalized = 0;
        for slot in self.open.iter_mut() {
            if let Some(idx) = slot.take() {
                self.entries[idx].is_partial = false;
                finalized += 1;
            }
        }
        finalized
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Partial entry currently open for `source`, if any
    pub fn partial(&self, source: TranscriptSource) -> Option<&TranscriptEntry> {
        self.open[source.slot()].map(|idx| &self.entries[idx])
    }
}
