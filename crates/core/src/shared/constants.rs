/// Directory name used under the platform config/picture/data dirs.
pub const APP_DIR_NAME: &str = "FaceSnap";

/// File name prefix for captured pictures: `<prefix>-<unix millis>.jpg`.
pub const CAPTURE_FILE_PREFIX: &str = "facesnap";

pub const CAPTURE_EXTENSION: &str = "jpg";

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Pacing between frames replayed from disk (~30 fps).
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 33;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
