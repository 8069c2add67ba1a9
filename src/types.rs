//! Core types for channel-harvest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

/// A channel to acquire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTarget {
    /// Public channel name (also used in file names)
    pub name: String,
    /// Higher priority channels are scheduled first
    #[serde(default)]
    pub priority: i32,
    /// Free-form content tag (e.g. "pharma", "cosmetic")
    #[serde(default)]
    pub mode: String,
}

impl ChannelTarget {
    /// Scheduling order: priority descending, then name ascending
    pub fn schedule_cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// Return the targets in deterministic scheduling order
pub fn sort_targets(targets: &[ChannelTarget]) -> Vec<ChannelTarget> {
    let mut sorted = targets.to_vec();
    sorted.sort_by(ChannelTarget::schedule_cmp);
    sorted
}

/// Per-channel acquisition status
///
/// Transitions only move forward: `Pending -> Active -> Completed | Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Waiting for a scheduler slot
    Pending,
    /// Currently being acquired
    Active,
    /// Stream exhausted and archive closed
    Completed,
    /// Resolution failed, processing aborted, or interrupted by shutdown
    Failed,
}

impl ChannelStatus {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: ChannelStatus) -> bool {
        matches!(
            (self, next),
            (ChannelStatus::Pending, ChannelStatus::Active)
                | (ChannelStatus::Active, ChannelStatus::Completed)
                | (ChannelStatus::Active, ChannelStatus::Failed)
        )
    }

    /// Whether the channel has settled
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelStatus::Completed | ChannelStatus::Failed)
    }

    /// Lowercase label used in logs and reports
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelStatus::Pending => "pending",
            ChannelStatus::Active => "active",
            ChannelStatus::Completed => "completed",
            ChannelStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// View/forward/reply counters and the derived engagement score
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    /// View count, if the provider reports it
    pub views: Option<u64>,
    /// Forward count, if the provider reports it
    pub forwards: Option<u64>,
    /// Reply count, if the provider reports it
    pub replies: Option<u64>,
    /// Weighted engagement score
    pub score: f64,
}

/// A formatted span of message text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEntity {
    /// Entity kind as reported by the provider (e.g. "url", "hashtag")
    pub kind: String,
    /// The sliced text
    pub text: String,
    /// Offset in UTF-16 code units
    pub offset: usize,
    /// Length in UTF-16 code units
    pub length: usize,
}

/// Outcome of handling one message's media
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// File name relative to the media directory
    pub path: String,
    /// Media kind as reported by the provider ("photo", "document", ...)
    pub kind: String,
    /// Final size on disk in bytes
    pub size: u64,
    /// Whether the image was re-encoded
    pub optimized: bool,
    /// Bytes saved by re-encoding (negative when the file grew)
    pub bytes_saved: i64,
    /// Whether the file made it into an archive
    pub packaged: bool,
    /// Archive file name holding the media, when packaged
    pub package: Option<String>,
}

/// One processed message, as persisted in batch files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Stable identity derived from channel and source id
    pub fingerprint: String,
    /// Provider message id
    pub source_id: i64,
    /// Channel name
    pub channel: String,
    /// Publication time
    pub timestamp: Option<DateTime<Utc>>,
    /// Message text (empty when absent)
    pub text: String,
    /// Engagement counters
    pub engagement: EngagementMetrics,
    /// Extracted entities in provider order
    pub entities: Vec<TextEntity>,
    /// Media outcome, when the message carried media and it was acquired
    pub media: Option<MediaDescriptor>,
}

/// Lifecycle events broadcast to subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A channel obtained a scheduler slot
    ChannelStarted {
        /// Channel name
        channel: String,
    },

    /// A channel finished streaming and closed its archive
    ChannelCompleted {
        /// Channel name
        channel: String,
        /// Messages processed
        messages: u64,
    },

    /// A channel failed or was interrupted
    ChannelFailed {
        /// Channel name
        channel: String,
        /// Failure reason
        error: String,
    },

    /// A batch was compressed and written
    BatchFlushed {
        /// Channel name
        channel: String,
        /// Number of records in the batch
        records: usize,
        /// Batch file on disk
        path: PathBuf,
    },

    /// A media file was acquired (downloaded or already present)
    MediaAcquired {
        /// Channel name
        channel: String,
        /// Final media path
        path: PathBuf,
        /// Final size in bytes
        size: u64,
    },

    /// A new archive package was opened
    ArchiveOpened {
        /// Channel name
        channel: String,
        /// Archive path
        path: PathBuf,
    },

    /// An archive was closed and passed verification
    ArchiveVerified {
        /// Archive path
        path: PathBuf,
        /// Number of entries
        entries: usize,
    },

    /// An archive failed verification and was deleted
    ArchiveCorrupt {
        /// Archive path (no longer on disk)
        path: PathBuf,
        /// Verification failure
        error: String,
    },

    /// No progress was recorded for longer than the stall threshold
    StallDetected {
        /// Seconds since the last recorded activity
        idle_secs: u64,
    },

    /// The harvester finished its shutdown sequence
    Shutdown,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, priority: i32) -> ChannelTarget {
        ChannelTarget {
            name: name.to_string(),
            priority,
            mode: String::new(),
        }
    }

    #[test]
    fn targets_sort_by_priority_then_name() {
        let targets = vec![target("A", 9), target("B", 7), target("C", 8)];
        let names: Vec<_> = sort_targets(&targets)
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["A", "C", "B"]);
    }

    #[test]
    fn equal_priorities_fall_back_to_name() {
        let targets = vec![target("zeta", 5), target("alpha", 5), target("mid", 6)];
        let names: Vec<_> = sort_targets(&targets)
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["mid", "alpha", "zeta"]);
    }

    #[test]
    fn status_transitions_only_move_forward() {
        use ChannelStatus::*;

        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Pending));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::BatchFlushed {
            channel: "CheMed123".into(),
            records: 300,
            path: PathBuf::from("raw/2024-01-01/CheMed123.json.zst"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "batch_flushed");
        assert_eq!(json["records"], 300);
    }
}
