//! Message and media fixtures

use channel_harvest::provider::{MediaKind, RawEntity, RawMedia, RawMessage};
use chrono::{TimeZone, Utc};

/// Plain text messages with ids `1..=count`
pub fn text_messages(count: i64) -> Vec<RawMessage> {
    (1..=count)
        .map(|id| RawMessage {
            id,
            date: Utc.timestamp_opt(1_704_067_200 + id * 60, 0).single(),
            text: Some(format!("Paracetamol 500mg, offer #{id} https://shop.example")),
            views: Some(100 * id as u64),
            forwards: Some(id as u64),
            replies: None,
            entities: vec![RawEntity {
                kind: "url".to_string(),
                offset: format!("Paracetamol 500mg, offer #{id} ").encode_utf16().count(),
                length: "https://shop.example".len(),
            }],
            media: None,
        })
        .collect()
}

/// Message `id` carrying a photo served under `media_id`
pub fn photo_message(id: i64, media_id: &str) -> RawMessage {
    RawMessage {
        id,
        date: Utc.timestamp_opt(1_704_067_200 + id * 60, 0).single(),
        text: Some("New stock".to_string()),
        views: Some(42),
        media: Some(RawMedia {
            id: media_id.to_string(),
            kind: MediaKind::Photo,
            size: None,
        }),
        ..Default::default()
    }
}

/// Message `id` carrying a document served under `media_id`
pub fn document_message(id: i64, media_id: &str, file_name: &str) -> RawMessage {
    RawMessage {
        id,
        date: Utc.timestamp_opt(1_704_067_200 + id * 60, 0).single(),
        text: Some("Price list attached".to_string()),
        media: Some(RawMedia {
            id: media_id.to_string(),
            kind: MediaKind::Document {
                file_name: Some(file_name.to_string()),
            },
            size: Some(2048),
        }),
        ..Default::default()
    }
}

/// A small PNG image
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 60]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png fixture");
    out.into_inner()
}
