use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Formats the given [Duration] as "MM:SSs"
pub fn format_time(t: Duration) -> String {
    let minutes = t.as_secs() / 60;
    let seconds = t.as_secs() % 60;
    format!("{:02}:{:02}s", minutes, seconds)
}

/// Formats a position in seconds as "MM:SSs". Negative positions are shown as zero.
pub fn format_seconds(secs: f64) -> String {
    format_time(Duration::from_secs_f64(secs.max(0.0)))
}

/// Rounds `value` to the given number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Checks if the given path points to a media file that carries audio.
///
/// If `full` is set to **false**, only the file header will be checked. This is a very cheap
/// operation, but it does not guarantee validity. If set to **true**, FFmpeg will be used to
/// open the container and look for at least one audio stream - this is more expensive, but
/// much more accurate.
pub fn is_valid_media_file(path: impl AsRef<Path>, full: bool) -> bool {
    if !full {
        let mut buf = [0u8; 8192];
        let n = match std::fs::File::open(path.as_ref()).and_then(|mut f| f.read(&mut buf)) {
            Ok(n) => n,
            Err(_) => return false,
        };
        return infer::is_video(&buf[..n]) || infer::is_audio(&buf[..n]);
    }

    if let Ok(input) = ffmpeg_next::format::input(&path.as_ref()) {
        input
            .streams()
            .any(|s| s.parameters().medium() == ffmpeg_next::util::media::Type::Audio)
    } else {
        false
    }
}

/// Returns the underlying FFmpeg version integer.
pub fn ffmpeg_version() -> u32 {
    ffmpeg_next::util::version()
}

/// Returns the underlying FFmpeg version string.
pub fn ffmpeg_version_string() -> String {
    let version_int = ffmpeg_version();

    // Reference: https://github.com/FFmpeg/FFmpeg/blob/130d19bf2044ac76372d1b97ab87ab283c8b37f8/libavutil/version.h#L64
    format!(
        "{}.{}.{}",
        version_int >> 16,             // MAJOR
        (version_int & 0x00FF00) >> 8, // MINOR
        version_int & 0xFF             // MICRO
    )
}
