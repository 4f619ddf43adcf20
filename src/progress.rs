use std::path::PathBuf;

/// Passed to `--progress-template` so each download tick prints one
/// `progress: 42.0%` line on stdout.
pub const PROGRESS_TEMPLATE: &str = "download:progress:%(progress._percent_str)s";

/// Returns the download fraction (0.0 to 1.0) carried by a progress line.
pub fn parse_progress_from_line(line: &str) -> Option<f32> {
    let rest = line.trim().strip_prefix("progress:")?;
    let number = rest.trim().strip_suffix('%')?;
    let value = number.trim().parse::<f32>().ok()?;
    Some((value / 100.0).clamp(0.0, 1.0))
}

/// Returns the file yt-dlp reports it is writing, if the line announces one.
///
/// The last announced file wins: merges and audio extraction report the
/// final name after the intermediate downloads.
pub fn parse_destination_from_line(line: &str) -> Option<PathBuf> {
    let line = line.trim();
    let path = if let Some(rest) = line.strip_prefix("[Merger] Merging formats into ") {
        rest.trim_matches('"')
    } else if let Some(rest) = line
        .strip_prefix("[download] Destination: ")
        .or_else(|| line.strip_prefix("[ExtractAudio] Destination: "))
    {
        rest
    } else if let Some(rest) = line.strip_prefix("[download] ") {
        rest.strip_suffix(" has already been downloaded")?
    } else {
        return None;
    };
    (!path.is_empty()).then(|| PathBuf::from(path))
}
