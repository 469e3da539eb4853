use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use image::imageops::FilterType;
use image::RgbImage;

use crate::shared::constants::{DEFAULT_FRAME_INTERVAL_MS, IMAGE_EXTENSIONS};
use crate::shared::frame::Frame;
use crate::video::domain::frame_source::{FrameSource, SourceError, SourceInfo};
use crate::video::domain::still_source::StillSource;

/// Replays a directory of still images as a live camera feed.
///
/// Files are delivered in name order, paced by the frame interval, and
/// optionally downscaled for analysis. With looping enabled the feed never
/// ends, like a real camera.
pub struct ImageDirectorySource {
    dir: PathBuf,
    interval: Duration,
    looping: bool,
    analysis_max_dimension: Option<u32>,
    rotation_degrees: u16,
    files: Vec<PathBuf>,
    next_sequence: u64,
    last_emitted: Arc<Mutex<Option<PathBuf>>>,
}

impl ImageDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            interval: Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS),
            looping: false,
            analysis_max_dimension: None,
            rotation_degrees: 0,
            files: Vec::new(),
            next_sequence: 0,
            last_emitted: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Downscales frames whose longer side exceeds `max` before delivery.
    pub fn with_analysis_max_dimension(mut self, max: Option<u32>) -> Self {
        self.analysis_max_dimension = max.filter(|&m| m > 0);
        self
    }

    pub fn with_rotation(mut self, degrees: u16) -> Self {
        self.rotation_degrees = degrees;
        self
    }

    /// A still-capture device that grabs the most recently delivered image
    /// at full resolution.
    pub fn still_source(&self) -> DirectoryStillSource {
        DirectoryStillSource {
            last_emitted: self.last_emitted.clone(),
            rotation_degrees: self.rotation_degrees,
        }
    }

    fn load(&self, path: &Path, sequence: u64) -> Result<Frame, SourceError> {
        let img = decode_rgb(path).map_err(SourceError::Read)?;
        let img = match self.analysis_max_dimension {
            Some(max) => downscale(img, max),
            None => img,
        };
        Ok(rgb_to_frame(img, sequence).with_rotation(self.rotation_degrees))
    }
}

impl FrameSource for ImageDirectorySource {
    fn open(&mut self) -> Result<SourceInfo, SourceError> {
        let files = list_images(&self.dir)?;
        let first = files
            .first()
            .ok_or_else(|| SourceError::Open(format!("no images in {}", self.dir.display())))?;
        let (width, height) = image::image_dimensions(first)
            .map_err(|e| SourceError::Open(format!("{}: {e}", first.display())))?;

        let fps = if self.interval.is_zero() {
            0.0
        } else {
            1.0 / self.interval.as_secs_f64()
        };
        let total_frames = (!self.looping).then_some(files.len());
        log::info!(
            "Opened {} ({} images, {width}x{height}{})",
            self.dir.display(),
            files.len(),
            if self.looping { ", looping" } else { "" }
        );

        self.files = files;
        self.next_sequence = 0;
        Ok(SourceInfo {
            width,
            height,
            fps,
            total_frames,
        })
    }

    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, SourceError>> + '_> {
        let mut index = 0usize;
        Box::new(std::iter::from_fn(move || {
            if self.files.is_empty() {
                return None;
            }
            if index == self.files.len() {
                if !self.looping {
                    return None;
                }
                index = 0;
            }
            if self.next_sequence > 0 && !self.interval.is_zero() {
                thread::sleep(self.interval);
            }

            let path = self.files[index].clone();
            index += 1;
            let sequence = self.next_sequence;
            self.next_sequence += 1;

            let result = self.load(&path, sequence);
            if result.is_ok() {
                *self
                    .last_emitted
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(path);
            }
            Some(result)
        }))
    }

    fn close(&mut self) {
        self.files.clear();
    }
}

/// Full-resolution still grabbed from the image the directory source
/// delivered last.
pub struct DirectoryStillSource {
    last_emitted: Arc<Mutex<Option<PathBuf>>>,
    rotation_degrees: u16,
}

impl StillSource for DirectoryStillSource {
    fn grab(&self) -> Result<Frame, Box<dyn std::error::Error + Send + Sync>> {
        let path = self
            .last_emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or("no frame has been delivered yet")?;
        let img = decode_rgb(&path)?;
        Ok(rgb_to_frame(img, 0).with_rotation(self.rotation_degrees))
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| SourceError::Open(format!("{}: {e}", dir.display())))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_image(path))
        .collect();
    files.sort();
    Ok(files)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn decode_rgb(path: &Path) -> Result<RgbImage, String> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| format!("{}: {e}", path.display()))
}

fn downscale(img: RgbImage, max: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let longest = w.max(h);
    if longest <= max {
        return img;
    }
    let scale = max as f64 / longest as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    image::imageops::resize(&img, nw, nh, FilterType::Triangle)
}

fn rgb_to_frame(img: RgbImage, sequence: u64) -> Frame {
    let (width, height) = img.dimensions();
    Frame::new(img.into_raw(), width, height, 3, sequence)
}
