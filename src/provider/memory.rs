//! Scripted in-memory content provider
//!
//! Serves pre-loaded channels and media blobs, and can be told to misbehave in the
//! ways real services do: rate-limit resolution, fail or hang downloads, end a
//! stream with an error, or stop producing messages without closing the stream.

use super::{ChannelHandle, ContentProvider, MessageStream, ProgressCallback, RawMedia, RawMessage};
use crate::error::ProviderError;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct ScriptedChannel {
    id: i64,
    messages: Vec<RawMessage>,
    terminal: Option<ProviderError>,
    resolve_failures: VecDeque<ProviderError>,
    stream_error_after: Option<(usize, ProviderError)>,
    hang_after_messages: bool,
    message_delay: Duration,
}

#[derive(Default)]
struct ScriptedMedia {
    bytes: Vec<u8>,
    failures: VecDeque<ProviderError>,
    hang_with_partial: Option<Vec<u8>>,
}

#[derive(Default)]
struct State {
    channels: HashMap<String, ScriptedChannel>,
    media: HashMap<String, ScriptedMedia>,
    resolve_order: Vec<String>,
    resolve_calls: HashMap<String, usize>,
    download_calls: HashMap<String, usize>,
}

/// In-memory [`ContentProvider`]
pub struct MemoryProvider {
    state: Mutex<State>,
    resolve_delay: Duration,
    connected: AtomicBool,
    resolves_in_flight: AtomicUsize,
    max_resolves_in_flight: AtomicUsize,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            resolve_delay: Duration::ZERO,
            connected: AtomicBool::new(true),
            resolves_in_flight: AtomicUsize::new(0),
            max_resolves_in_flight: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel_mut(&mut self, name: &str) -> &mut ScriptedChannel {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let next_id = state.channels.len() as i64 + 1;
        state
            .channels
            .entry(name.to_string())
            .or_insert_with(|| ScriptedChannel {
                id: next_id,
                ..Default::default()
            })
    }

    fn media_mut(&mut self, media_id: &str) -> &mut ScriptedMedia {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.media.entry(media_id.to_string()).or_default()
    }

    /// Add a channel serving `messages` (re-ordered oldest first)
    pub fn with_channel(mut self, name: &str, mut messages: Vec<RawMessage>) -> Self {
        messages.sort_by_key(|m| m.id);
        self.channel_mut(name).messages = messages;
        self
    }

    /// Add a channel whose resolution always fails with `error`
    pub fn with_unresolvable_channel(mut self, name: &str, error: ProviderError) -> Self {
        self.channel_mut(name).terminal = Some(error);
        self
    }

    /// Fail the next resolutions of `name` with `errors`, in order
    pub fn with_resolve_failures(mut self, name: &str, errors: Vec<ProviderError>) -> Self {
        self.channel_mut(name).resolve_failures = errors.into();
        self
    }

    /// End the stream with `error` after `after` messages
    pub fn with_stream_error(mut self, name: &str, after: usize, error: ProviderError) -> Self {
        self.channel_mut(name).stream_error_after = Some((after, error));
        self
    }

    /// Keep the stream open forever after the scripted messages
    pub fn with_hanging_stream(mut self, name: &str) -> Self {
        self.channel_mut(name).hang_after_messages = true;
        self
    }

    /// Delay every message of `name` by `delay`
    pub fn with_message_delay(mut self, name: &str, delay: Duration) -> Self {
        self.channel_mut(name).message_delay = delay;
        self
    }

    /// Delay every channel resolution
    pub fn with_resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = delay;
        self
    }

    /// Serve `bytes` for media `media_id`
    pub fn with_media(mut self, media_id: &str, bytes: Vec<u8>) -> Self {
        self.media_mut(media_id).bytes = bytes;
        self
    }

    /// Fail the next downloads of `media_id` with `errors`, in order
    pub fn with_download_failures(mut self, media_id: &str, errors: Vec<ProviderError>) -> Self {
        self.media_mut(media_id).failures = errors.into();
        self
    }

    /// Write `partial` to the destination, then never finish the download
    pub fn with_hanging_download(mut self, media_id: &str, partial: Vec<u8>) -> Self {
        self.media_mut(media_id).hang_with_partial = Some(partial);
        self
    }

    /// Channel names in the order they were first resolved
    pub fn resolve_order(&self) -> Vec<String> {
        self.state().resolve_order.clone()
    }

    /// Number of resolution attempts for `name`
    pub fn resolve_calls(&self, name: &str) -> usize {
        self.state().resolve_calls.get(name).copied().unwrap_or(0)
    }

    /// Number of download attempts for `media_id`
    pub fn download_calls(&self, media_id: &str) -> usize {
        self.state().download_calls.get(media_id).copied().unwrap_or(0)
    }

    /// Highest number of resolutions that were in progress at once
    pub fn max_concurrent_resolves(&self) -> usize {
        self.max_resolves_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentProvider for MemoryProvider {
    async fn resolve_channel(&self, name: &str) -> Result<ChannelHandle, ProviderError> {
        {
            let mut state = self.state();
            *state.resolve_calls.entry(name.to_string()).or_default() += 1;
            if !state.resolve_order.iter().any(|n| n == name) {
                state.resolve_order.push(name.to_string());
            }
        }

        let in_flight = self.resolves_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_resolves_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        if !self.resolve_delay.is_zero() {
            tokio::time::sleep(self.resolve_delay).await;
        }
        self.resolves_in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state();
        let Some(channel) = state.channels.get_mut(name) else {
            return Err(ProviderError::NotFound(name.to_string()));
        };
        if let Some(error) = &channel.terminal {
            return Err(error.clone());
        }
        if let Some(error) = channel.resolve_failures.pop_front() {
            return Err(error);
        }

        Ok(ChannelHandle {
            id: channel.id,
            name: name.to_string(),
            title: Some(name.to_string()),
        })
    }

    fn stream_messages<'a>(&'a self, channel: &'a ChannelHandle) -> MessageStream<'a> {
        let (items, hang, delay) = {
            let state = self.state();
            match state.channels.get(&channel.name) {
                Some(script) => {
                    let mut items: Vec<Result<RawMessage, ProviderError>> =
                        script.messages.iter().cloned().map(Ok).collect();
                    if let Some((after, error)) = &script.stream_error_after {
                        items.truncate(*after);
                        items.push(Err(error.clone()));
                    }
                    (items, script.hang_after_messages, script.message_delay)
                }
                None => (
                    vec![Err(ProviderError::NotFound(channel.name.clone()))],
                    false,
                    Duration::ZERO,
                ),
            }
        };

        let scripted = stream::iter(items).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        });

        if hang {
            scripted.chain(stream::pending()).boxed()
        } else {
            scripted.boxed()
        }
    }

    async fn download_media(
        &self,
        media: &RawMedia,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<(), ProviderError> {
        let outcome = {
            let mut state = self.state();
            *state.download_calls.entry(media.id.clone()).or_default() += 1;
            match state.media.get_mut(&media.id) {
                None => Err(ProviderError::NotFound(media.id.clone())),
                Some(script) => {
                    if let Some(error) = script.failures.pop_front() {
                        Err(error)
                    } else if let Some(partial) = &script.hang_with_partial {
                        Ok((partial.clone(), true))
                    } else {
                        Ok((script.bytes.clone(), false))
                    }
                }
            }
        };

        let (bytes, hang) = outcome?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| ProviderError::Other(format!("failed to write {}: {}", dest.display(), e)))?;

        if hang {
            futures::future::pending::<()>().await;
        }

        if let Some(progress) = progress {
            let total = media.size.unwrap_or(bytes.len() as u64);
            progress(bytes.len() as u64, total);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
