//! Frame sources, display sinks and command sources.
//!
//! These are the seams between the per-frame sessions and the outside world.
//! The file-backed implementations need the `image` feature; the in-memory
//! ones are always available.

use camcalib_core::RgbImage;
use log::{info, warn};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

#[cfg(feature = "image")]
use crate::image_io::{load_rgb, save_rgb};

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "image")]
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("pixel buffer does not match {width}x{height}")]
    InvalidBuffer { width: usize, height: usize },
}

/// Supplies frames until the stream ends (`Ok(None)`).
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameError>;
}

/// Presents a frame with an optional line of overlay text.
pub trait DisplaySink {
    fn show(&mut self, frame: &RgbImage, overlay: Option<&str>);
}

/// Discrete user commands fed into the frame loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Keep the current frame for calibration.
    SelectFrame,
    /// Switch between the rectified and the original stream.
    ToggleRectify,
    /// End the loop after the current frame.
    Stop,
}

/// Commands issued while frame `index` is on screen.
pub trait CommandSource {
    fn poll(&mut self, index: usize) -> Vec<Command>;
}

/// Frames held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryFrames {
    frames: VecDeque<RgbImage>,
}

impl MemoryFrames {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FromIterator<RgbImage> for MemoryFrames {
    fn from_iter<I: IntoIterator<Item = RgbImage>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

impl FrameSource for MemoryFrames {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameError> {
        Ok(self.frames.pop_front())
    }
}

const IMAGE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm", "ppm"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Image files of a directory, in file-name order.
#[derive(Clone, Debug)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, FrameError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(FrameError::NotADirectory(dir.to_path_buf()));
        }
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if is_image_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        info!("{} frames in {}", paths.len(), dir.display());
        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

#[cfg(feature = "image")]
impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameError> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        load_rgb(path).map(Some)
    }
}

/// Drops every frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn show(&mut self, _frame: &RgbImage, _overlay: Option<&str>) {}
}

/// Keeps every frame and its overlay text.
#[derive(Clone, Debug, Default)]
pub struct CollectingSink {
    pub frames: Vec<(RgbImage, Option<String>)>,
}

impl DisplaySink for CollectingSink {
    fn show(&mut self, frame: &RgbImage, overlay: Option<&str>) {
        self.frames.push((frame.clone(), overlay.map(str::to_owned)));
    }
}

/// Writes `frame_00000.png`, `frame_00001.png`, ... into a directory and
/// logs the overlay text.
///
/// `show` cannot fail; the first write error is kept and returned by
/// [`PngSequenceSink::finish`].
#[cfg(feature = "image")]
#[derive(Debug)]
pub struct PngSequenceSink {
    dir: PathBuf,
    written: usize,
    error: Option<FrameError>,
}

#[cfg(feature = "image")]
impl PngSequenceSink {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, FrameError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            written: 0,
            error: None,
        })
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("frame_{index:05}.png"))
    }

    /// Number of frames written, or the first write error.
    pub fn finish(self) -> Result<usize, FrameError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.written),
        }
    }
}

#[cfg(feature = "image")]
impl DisplaySink for PngSequenceSink {
    fn show(&mut self, frame: &RgbImage, overlay: Option<&str>) {
        if self.error.is_some() {
            return;
        }
        let path = self.frame_path(self.written);
        if let Some(text) = overlay {
            info!("{}: {text}", path.display());
        }
        match save_rgb(frame, &path) {
            Ok(()) => self.written += 1,
            Err(err) => {
                warn!("failed to write {}: {err}", path.display());
                self.error = Some(err);
            }
        }
    }
}

/// Selects every frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectAll;

impl CommandSource for SelectAll {
    fn poll(&mut self, _index: usize) -> Vec<Command> {
        vec![Command::SelectFrame]
    }
}

/// Commands fixed up front by frame index.
#[derive(Clone, Debug, Default)]
pub struct ScriptedCommands {
    select: BTreeSet<usize>,
    toggle: BTreeSet<usize>,
    stop_at: Option<usize>,
}

impl ScriptedCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, frames: impl IntoIterator<Item = usize>) -> Self {
        self.select.extend(frames);
        self
    }

    pub fn toggle(mut self, frames: impl IntoIterator<Item = usize>) -> Self {
        self.toggle.extend(frames);
        self
    }

    pub fn stop_at(mut self, frame: Option<usize>) -> Self {
        self.stop_at = frame;
        self
    }
}

impl CommandSource for ScriptedCommands {
    fn poll(&mut self, index: usize) -> Vec<Command> {
        let mut out = Vec::new();
        if self.select.contains(&index) {
            out.push(Command::SelectFrame);
        }
        if self.toggle.contains(&index) {
            out.push(Command::ToggleRectify);
        }
        if self.stop_at == Some(index) {
            out.push(Command::Stop);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_frames_end_with_none() {
        let mut src: MemoryFrames = (0..2).map(|_| RgbImage::new(4, 3)).collect();
        assert_eq!(src.remaining(), 2);
        assert!(src.next_frame().unwrap().is_some());
        assert!(src.next_frame().unwrap().is_some());
        assert!(src.next_frame().unwrap().is_none());
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn scripted_commands_fire_on_their_frames() {
        let mut cmds = ScriptedCommands::new()
            .select([1, 3])
            .toggle([3])
            .stop_at(Some(4));
        assert!(cmds.poll(0).is_empty());
        assert_eq!(cmds.poll(1), vec![Command::SelectFrame]);
        assert_eq!(
            cmds.poll(3),
            vec![Command::SelectFrame, Command::ToggleRectify]
        );
        assert_eq!(cmds.poll(4), vec![Command::Stop]);
        assert_eq!(SelectAll.poll(17), vec![Command::SelectFrame]);
    }

    #[test]
    fn collecting_sink_keeps_overlays() {
        let mut sink = CollectingSink::default();
        sink.show(&RgbImage::new(2, 2), Some("Rectified"));
        sink.show(&RgbImage::new(2, 2), None);
        assert_eq!(sink.frames.len(), 2);
        assert_eq!(sink.frames[0].1.as_deref(), Some("Rectified"));
        assert_eq!(sink.frames[1].1, None);
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            ImageSequence::open(&missing),
            Err(FrameError::NotADirectory(_))
        ));
    }

    #[cfg(feature = "image")]
    #[test]
    fn png_sequence_round_trips_through_image_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PngSequenceSink::create(dir.path()).unwrap();
        for k in 0..3u8 {
            let mut frame = RgbImage::new(5, 4);
            frame.put(1, 2, [k * 10, 20, 30]);
            sink.show(&frame, Some("Original"));
        }
        // non-image files are ignored
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(sink.finish().unwrap(), 3);

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.len(), 3);
        let mut k = 0u8;
        while let Some(frame) = seq.next_frame().unwrap() {
            assert_eq!((frame.width, frame.height), (5, 4));
            assert_eq!(frame.get(1, 2), [k * 10, 20, 30]);
            k += 1;
        }
        assert_eq!(k, 3);
    }
}
