//! Append-only interview transcript.
//!
//! Fragments arrive from the remote side in order and are never edited;
//! the UI renders the log as-is.

use chrono::{DateTime, Utc};

use crate::live::Speaker;

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, speaker: Speaker, text: String) {
        self.entries.push(TranscriptEntry {
            speaker,
            text,
            at: Utc::now(),
        });
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

    /// Drop everything; a new session starts with a blank log.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_keep_arrival_order() {
        let mut log = TranscriptLog::new();
        log.push(Speaker::Examiner, "Where do you live?".to_string());
        log.push(Speaker::Candidate, "In a small coastal town.".to_string());
        log.push(Speaker::Examiner, "What do you like about it?".to_string());

        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[0].speaker, Speaker::Examiner);
        assert_eq!(log.entries()[1].speaker, Speaker::Candidate);
        assert_eq!(log.entries()[1].text, "In a small coastal town.");
    }

    #[test]
    fn test_clear_empties_the_log() {
        let mut log = TranscriptLog::new();
        log.push(Speaker::Examiner, "Good morning.".to_string());
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
    }
}
