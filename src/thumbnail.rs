use std::time::Duration;

use eframe::egui::ColorImage;
use tracing::debug;

/// Largest preview drawn next to the URL field.
const MAX_WIDTH: u32 = 400;
const MAX_HEIGHT: u32 = 150;

/// Downloads and decodes the preview image for a video.
///
/// Runs on a blocking pool thread. Any failure just means no preview.
pub fn fetch_thumbnail(video_id: &str) -> Option<ColorImage> {
    // Standard high-quality default thumbnail
    let url = format!("https://img.youtube.com/vi/{video_id}/hqdefault.jpg");
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .ok()?;
    let bytes = match client.get(&url).send().and_then(|resp| resp.error_for_status()) {
        Ok(resp) => resp.bytes().ok()?,
        Err(err) => {
            debug!(video_id, "thumbnail fetch failed: {err}");
            return None;
        }
    };
    // Shrink to fit, keeping the aspect ratio
    let img = image::load_from_memory(&bytes)
        .ok()?
        .thumbnail(MAX_WIDTH, MAX_HEIGHT)
        .to_rgba8();
    let size = [img.width() as usize, img.height() as usize];
    Some(ColorImage::from_rgba_unmultiplied(size, &img))
}
