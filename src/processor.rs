//! Per-message transformation
//!
//! Turns a provider [`RawMessage`] into a [`MessageRecord`]: stable fingerprint,
//! engagement score, entity slices and (delegated) media acquisition.

use crate::archive::ArchivePackager;
use crate::error::{Error, MediaError, Result};
use crate::media::MediaAcquirer;
use crate::metrics::AcquisitionMetrics;
use crate::provider::{RawEntity, RawMessage};
use crate::types::{EngagementMetrics, MessageRecord, TextEntity};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Stable 32-hex-char identity of a message within a channel
///
/// SHA-256 of `"{source_id}{channel}"`, truncated to 128 bits.
pub fn fingerprint(channel: &str, source_id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.to_string().as_bytes());
    hasher.update(channel.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..32].to_string()
}

/// Weighted engagement: `(views*0.3 + forwards*0.5 + replies*0.2) / 100`
pub fn engagement_score(views: Option<u64>, forwards: Option<u64>, replies: Option<u64>) -> f64 {
    let views = views.unwrap_or(0) as f64;
    let forwards = forwards.unwrap_or(0) as f64;
    let replies = replies.unwrap_or(0) as f64;
    (views * 0.3 + forwards * 0.5 + replies * 0.2) / 100.0
}

/// Slice entity text out of `text`
///
/// Offsets and lengths are UTF-16 code units. Entities that fall outside the text
/// or cut a surrogate pair in half are skipped.
pub fn extract_entities(text: &str, entities: &[RawEntity]) -> Vec<TextEntity> {
    if entities.is_empty() {
        return Vec::new();
    }
    let units: Vec<u16> = text.encode_utf16().collect();

    entities
        .iter()
        .filter_map(|entity| {
            let end = entity.offset.checked_add(entity.length)?;
            if entity.length == 0 || end > units.len() {
                debug!(kind = %entity.kind, offset = entity.offset, length = entity.length, "Skipping out-of-range entity");
                return None;
            }
            match String::from_utf16(&units[entity.offset..end]) {
                Ok(slice) => Some(TextEntity {
                    kind: entity.kind.clone(),
                    text: slice,
                    offset: entity.offset,
                    length: entity.length,
                }),
                Err(_) => {
                    debug!(kind = %entity.kind, offset = entity.offset, "Skipping entity that splits a character");
                    None
                }
            }
        })
        .collect()
}

/// Builds records for one channel
pub struct MessageProcessor {
    media: MediaAcquirer,
    metrics: AcquisitionMetrics,
}

impl MessageProcessor {
    /// Create a processor delegating media to `media`
    pub fn new(media: MediaAcquirer, metrics: AcquisitionMetrics) -> Self {
        Self { media, metrics }
    }

    /// Transform one message
    ///
    /// Media failures are logged and leave `media` empty on the record. Only a
    /// shutdown during media acquisition fails the message, with
    /// [`Error::ShuttingDown`].
    pub async fn process(
        &self,
        raw: &RawMessage,
        channel: &str,
        packager: &mut ArchivePackager,
    ) -> Result<MessageRecord> {
        let fingerprint = fingerprint(channel, raw.id);
        let text = raw.text.clone().unwrap_or_default();
        let entities = extract_entities(&text, &raw.entities);

        let media = match &raw.media {
            None => None,
            Some(media) => match self
                .media
                .acquire(channel, &fingerprint, raw.date, media, packager)
                .await
            {
                Ok(descriptor) => Some(descriptor),
                Err(MediaError::Cancelled) => return Err(Error::ShuttingDown),
                Err(e) => {
                    warn!(
                        channel = %channel,
                        message_id = raw.id,
                        error = %e,
                        "Media acquisition failed, keeping message without media"
                    );
                    None
                }
            },
        };

        let record = MessageRecord {
            fingerprint,
            source_id: raw.id,
            channel: channel.to_string(),
            timestamp: raw.date,
            text,
            engagement: EngagementMetrics {
                views: raw.views,
                forwards: raw.forwards,
                replies: raw.replies,
                score: engagement_score(raw.views, raw.forwards, raw.replies),
            },
            entities,
            media,
        };

        self.metrics.record_message();
        Ok(record)
    }
}
