//! Content provider boundary
//!
//! The remote content service is an external collaborator. The engine only needs
//! three operations from it: resolve a channel name, stream that channel's messages
//! oldest-first, and download a media blob to a path. Implementations report
//! failures as [`ProviderError`] so transient conditions (rate limiting, server
//! errors) can be told apart from terminal ones (not found, access denied).

pub mod memory;

use crate::error::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use memory::MemoryProvider;

/// A resolved channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHandle {
    /// Provider-side channel id
    pub id: i64,
    /// Channel name as requested
    pub name: String,
    /// Display title, when the provider exposes one
    pub title: Option<String>,
}

/// A formatting entity as reported by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntity {
    /// Entity kind (e.g. "url", "mention", "hashtag")
    pub kind: String,
    /// Offset in UTF-16 code units
    pub offset: usize,
    /// Length in UTF-16 code units
    pub length: usize,
}

/// Declared media kind
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaKind {
    /// Compressed photo
    Photo,
    /// Arbitrary file attachment
    Document {
        /// Original file name, when declared
        file_name: Option<String>,
    },
    /// Anything else (web previews, polls, geo points, ...)
    Other {
        /// Provider's name for the media type
        name: String,
    },
}

impl MediaKind {
    /// Short label stored in media descriptors
    pub fn label(&self) -> &str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Document { .. } => "document",
            MediaKind::Other { name } => name,
        }
    }
}

/// Reference to a downloadable media blob
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMedia {
    /// Opaque provider reference
    pub id: String,
    /// Declared kind
    #[serde(flatten)]
    pub kind: MediaKind,
    /// Declared size in bytes, when known up front
    pub size: Option<u64>,
}

/// A message as delivered by the provider
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Provider message id, increasing with age within a channel
    pub id: i64,
    /// Publication time
    pub date: Option<DateTime<Utc>>,
    /// Message text
    pub text: Option<String>,
    /// View count
    pub views: Option<u64>,
    /// Forward count
    pub forwards: Option<u64>,
    /// Reply count
    pub replies: Option<u64>,
    /// Formatting entities
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    /// Attached media
    pub media: Option<RawMedia>,
}

/// Download progress callback: `(received_bytes, total_bytes)`
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Lazy, oldest-first message stream
pub type MessageStream<'a> = BoxStream<'a, Result<RawMessage, ProviderError>>;

/// Trait for the remote channel-content service
///
/// Implementations wrap a real messaging client; [`MemoryProvider`] is a scripted
/// in-memory implementation for tests and dry runs.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Resolve a channel name to a handle
    ///
    /// Must return `NotFound`, `AccessDenied` or `NotAChannel` for terminal
    /// conditions and a retryable variant for transient ones.
    async fn resolve_channel(&self, name: &str) -> Result<ChannelHandle, ProviderError>;

    /// Stream the channel's messages, oldest first, with no upper bound
    fn stream_messages<'a>(&'a self, channel: &'a ChannelHandle) -> MessageStream<'a>;

    /// Download a media blob to `dest`
    ///
    /// `dest` is a temporary path; the caller validates and commits it.
    async fn download_media(
        &self,
        media: &RawMedia,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<(), ProviderError>;

    /// Close the provider session
    async fn disconnect(&self);

    /// Whether the provider session is still open
    fn is_connected(&self) -> bool {
        true
    }
}
