//! Fixed-width summary report

use super::MetricsSnapshot;
use crate::types::ChannelStatus;

/// Render the end-of-run summary box
///
/// Every line is exactly `width` columns wide; over-long content is truncated.
pub fn format_report(snapshot: &MetricsSnapshot, width: usize) -> String {
    let inner = width.saturating_sub(2);
    let elapsed = snapshot.elapsed.as_secs();

    let mut lines = vec![
        format!("┌{}┐", "─".repeat(inner)),
        row("ACQUISITION REPORT", inner),
        format!("├{}┤", "─".repeat(inner)),
        row(
            &format!(
                "Duration: {:02}:{:02}:{:02} | Messages: {} | Media: {}",
                elapsed / 3600,
                (elapsed % 3600) / 60,
                elapsed % 60,
                snapshot.messages,
                snapshot.media
            ),
            inner,
        ),
        row(
            &format!(
                "Efficiency: {:.1} msg/sec | Data: {:.1}MB | Compression: {:+.1}KB saved",
                snapshot.throughput(),
                snapshot.data_volume as f64 / 1024.0 / 1024.0,
                snapshot.compression_gain as f64 / 1024.0
            ),
            inner,
        ),
        row(
            &format!(
                "Channels: {} completed | {} failed | {} pending | {} active",
                snapshot.count(ChannelStatus::Completed),
                snapshot.count(ChannelStatus::Failed),
                snapshot.count(ChannelStatus::Pending),
                snapshot.count(ChannelStatus::Active)
            ),
            inner,
        ),
    ];

    if !snapshot.channels.is_empty() {
        lines.push(format!("├{}┤", "─".repeat(inner)));
        for (name, status) in &snapshot.channels {
            lines.push(row(&format!("{name:<40} {status}"), inner));
        }
    }

    lines.push(format!("└{}┘", "─".repeat(inner)));
    lines.join("\n")
}

fn row(content: &str, inner: usize) -> String {
    let text: String = content.chars().take(inner.saturating_sub(1)).collect();
    let pad = inner.saturating_sub(1 + text.chars().count());
    format!("│ {}{}│", text, " ".repeat(pad))
}
