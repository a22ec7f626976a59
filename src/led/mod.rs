//! LED feedback on a segmented addressable strip
//!
//! The strip is split into consecutive segments. All but the last segment are "rungs"
//! showing the colors pressed so far; the last one is the result indicator.
//!
//! ```text
//! |  rung 0  |  rung 1  |  rung 2  |          result          |
//! ```
//!
//! Every animation blocks for its full duration. Presses during a flash are not seen.

pub mod ws2812;

use std::ops::Range;
use std::time::Duration;
use tracing::debug;

use crate::controller::sequence_lock::{Color, Outcome};

const BLINK: Duration = Duration::from_millis(200);
const SUCCESS_HOLD: Duration = Duration::from_secs(1);
const FAILURE_BLINKS: usize = 3;
const CONFIRMATION_BLINKS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const OFF: Rgb = Rgb(0, 0, 0);
    pub const RED: Rgb = Rgb(255, 0, 0);
    pub const GREEN: Rgb = Rgb(0, 255, 0);
    pub const BLUE: Rgb = Rgb(0, 0, 255);
}

impl From<Color> for Rgb {
    fn from(color: Color) -> Self {
        match color {
            Color::Red => Rgb::RED,
            Color::Green => Rgb::GREEN,
            Color::Blue => Rgb::BLUE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedError {
    #[error("SPI error: {0}")]
    Spi(#[from] rppal::spi::Error),

    #[error("invalid segment layout: {0}")]
    InvalidLayout(String),

    #[error("layout needs {needed} pixels but strip has {available}")]
    StripTooShort { needed: usize, available: usize },

    #[error("unsupported SPI bus {0}")]
    UnsupportedBus(u8),
}

/// Driver capability: buffered pixel writes plus an explicit flush.
pub trait PixelStrip {
    fn len(&self) -> usize;
    fn set_pixel(&mut self, index: usize, color: Rgb);
    fn flush(&mut self) -> Result<(), LedError>;
}

/// Segment lengths and their derived start offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedLayout {
    lengths: Vec<usize>,
    starts: Vec<usize>,
}

impl LedLayout {
    pub fn new(lengths: Vec<usize>) -> Result<Self, LedError> {
        if lengths.len() < 2 {
            return Err(LedError::InvalidLayout(format!(
                "need at least one rung and one result segment, got {}",
                lengths.len()
            )));
        }
        if let Some(i) = lengths.iter().position(|&len| len == 0) {
            return Err(LedError::InvalidLayout(format!("segment {} is empty", i)));
        }
        let starts = lengths
            .iter()
            .scan(0, |offset, &len| {
                let start = *offset;
                *offset += len;
                Some(start)
            })
            .collect();
        Ok(Self { lengths, starts })
    }

    pub fn total(&self) -> usize {
        self.lengths.iter().sum()
    }

    pub fn rung_count(&self) -> usize {
        self.lengths.len() - 1
    }

    pub fn segment(&self, index: usize) -> Range<usize> {
        self.starts[index]..self.starts[index] + self.lengths[index]
    }

    pub fn result_segment(&self) -> Range<usize> {
        self.segment(self.lengths.len() - 1)
    }
}

pub struct LedFeedback {
    strip: Box<dyn PixelStrip + Send>,
    layout: LedLayout,
    sleep: Box<dyn FnMut(Duration) + Send>,
}

impl LedFeedback {
    pub fn new(strip: Box<dyn PixelStrip + Send>, layout: LedLayout) -> Result<Self, LedError> {
        if strip.len() < layout.total() {
            return Err(LedError::StripTooShort {
                needed: layout.total(),
                available: strip.len(),
            });
        }
        Ok(Self {
            strip,
            layout,
            sleep: Box::new(std::thread::sleep),
        })
    }

    /// Replaces the blocking sleep used between animation frames.
    pub fn with_sleep(mut self, sleep: impl FnMut(Duration) + Send + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn layout(&self) -> &LedLayout {
        &self.layout
    }

    pub fn clear_all(&mut self) -> Result<(), LedError> {
        self.fill(0..self.layout.total(), Rgb::OFF);
        self.strip.flush()
    }

    /// Paints one rung per pressed color. The result segment is left untouched.
    pub fn render_progress(&mut self, progress: &[Color], code_length: usize) -> Result<(), LedError> {
        let rungs = self.layout.rung_count();
        for rung in 0..rungs {
            self.fill(self.layout.segment(rung), Rgb::OFF);
        }
        for (rung, &color) in progress.iter().enumerate().take(rungs.min(code_length)) {
            self.fill(self.layout.segment(rung), color.into());
        }
        self.strip.flush()
    }

    pub fn flash_result(&mut self, outcome: &Outcome) -> Result<(), LedError> {
        let result = self.layout.result_segment();
        match outcome {
            Outcome::Success => {
                debug!("Showing success");
                self.fill(result.clone(), Rgb::GREEN);
                self.strip.flush()?;
                (self.sleep)(SUCCESS_HOLD);
                self.fill(result, Rgb::OFF);
                self.strip.flush()
            }
            Outcome::Failure => {
                debug!("Showing failure");
                self.blink(result, Rgb::RED, FAILURE_BLINKS)
            }
            Outcome::InProgress(_) | Outcome::CodeUpdated => Ok(()),
        }
    }

    /// Blinks the entire strip green, ignoring segment boundaries.
    pub fn flash_confirmation(&mut self) -> Result<(), LedError> {
        debug!("Showing code update confirmation");
        self.blink(0..self.layout.total(), Rgb::GREEN, CONFIRMATION_BLINKS)
    }

    fn blink(&mut self, range: Range<usize>, color: Rgb, times: usize) -> Result<(), LedError> {
        for _ in 0..times {
            self.fill(range.clone(), color);
            self.strip.flush()?;
            (self.sleep)(BLINK);
            self.fill(range.clone(), Rgb::OFF);
            self.strip.flush()?;
            (self.sleep)(BLINK);
        }
        Ok(())
    }

    fn fill(&mut self, range: Range<usize>, color: Rgb) {
        for i in range {
            self.strip.set_pixel(i, color);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every flushed frame.
    #[derive(Clone, Default)]
    pub struct RecordingStrip {
        pixels: Vec<Rgb>,
        pub frames: Arc<Mutex<Vec<Vec<Rgb>>>>,
    }

    impl RecordingStrip {
        pub fn new(len: usize) -> Self {
            Self {
                pixels: vec![Rgb::OFF; len],
                frames: Arc::default(),
            }
        }
    }

    impl PixelStrip for RecordingStrip {
        fn len(&self) -> usize {
            self.pixels.len()
        }

        fn set_pixel(&mut self, index: usize, color: Rgb) {
            self.pixels[index] = color;
        }

        fn flush(&mut self) -> Result<(), LedError> {
            self.frames.lock().unwrap().push(self.pixels.clone());
            Ok(())
        }
    }

    pub fn recording_feedback(
        lengths: Vec<usize>,
    ) -> (LedFeedback, Arc<Mutex<Vec<Vec<Rgb>>>>, Arc<Mutex<Vec<Duration>>>) {
        let layout = LedLayout::new(lengths).unwrap();
        let strip = RecordingStrip::new(layout.total());
        let frames = strip.frames.clone();
        let sleeps = Arc::new(Mutex::new(Vec::new()));
        let recorded = sleeps.clone();
        let feedback = LedFeedback::new(Box::new(strip), layout)
            .unwrap()
            .with_sleep(move |d| recorded.lock().unwrap().push(d));
        (feedback, frames, sleeps)
    }

    #[test]
    fn layout_offsets() {
        let layout = LedLayout::new(vec![9, 9, 9, 36]).unwrap();
        assert_eq!(layout.total(), 63);
        assert_eq!(layout.rung_count(), 3);
        assert_eq!(layout.segment(1), 9..18);
        assert_eq!(layout.result_segment(), 27..63);
    }

    #[test]
    fn layout_rejects_degenerate_input() {
        assert!(LedLayout::new(vec![10]).is_err());
        assert!(LedLayout::new(vec![3, 0, 4]).is_err());
    }

    #[test]
    fn strip_must_cover_layout() {
        let layout = LedLayout::new(vec![2, 2]).unwrap();
        let result = LedFeedback::new(Box::new(RecordingStrip::new(3)), layout);
        assert!(matches!(
            result,
            Err(LedError::StripTooShort { needed: 4, available: 3 })
        ));
    }

    #[test]
    fn progress_paints_rungs_and_spares_result() {
        let (mut leds, frames, _) = recording_feedback(vec![2, 2, 2, 3]);
        leds.fill(6..9, Rgb::GREEN);

        leds.render_progress(&[Color::Red, Color::Blue], 3).unwrap();

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(&frame[0..2], &[Rgb::RED, Rgb::RED]);
        assert_eq!(&frame[2..4], &[Rgb::BLUE, Rgb::BLUE]);
        assert_eq!(&frame[4..6], &[Rgb::OFF, Rgb::OFF]);
        assert!(frame[6..9].iter().all(|&p| p == Rgb::GREEN));
    }

    #[test]
    fn progress_never_writes_result_segment() {
        let (mut leds, frames, _) = recording_feedback(vec![1, 1, 2]);
        leds.render_progress(&[Color::Green, Color::Green, Color::Green], 3)
            .unwrap();
        let frame = frames.lock().unwrap().last().unwrap().clone();
        assert_eq!(frame, vec![Rgb::GREEN, Rgb::GREEN, Rgb::OFF, Rgb::OFF]);
    }

    #[test]
    fn success_holds_green_then_clears() {
        let (mut leds, frames, sleeps) = recording_feedback(vec![1, 2]);
        leds.flash_result(&Outcome::Success).unwrap();

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![Rgb::OFF, Rgb::GREEN, Rgb::GREEN]);
        assert_eq!(frames[1], vec![Rgb::OFF; 3]);
        assert_eq!(*sleeps.lock().unwrap(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn failure_blinks_red_three_times() {
        let (mut leds, frames, sleeps) = recording_feedback(vec![1, 1]);
        leds.flash_result(&Outcome::Failure).unwrap();

        let frames = frames.lock().unwrap();
        let on: Vec<_> = frames.iter().filter(|f| f[1] == Rgb::RED).collect();
        assert_eq!(on.len(), 3);
        assert_eq!(frames.len(), 6);
        assert!(frames.iter().all(|f| f[0] == Rgb::OFF));
        assert_eq!(sleeps.lock().unwrap().len(), 6);
        assert!(sleeps
            .lock()
            .unwrap()
            .iter()
            .all(|&d| d == Duration::from_millis(200)));
    }

    #[test]
    fn confirmation_blinks_whole_strip_twice() {
        let (mut leds, frames, _) = recording_feedback(vec![1, 1, 1]);
        leds.flash_confirmation().unwrap();

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], vec![Rgb::GREEN; 3]);
        assert_eq!(frames[1], vec![Rgb::OFF; 3]);
        assert_eq!(frames[2], vec![Rgb::GREEN; 3]);
    }

    #[test]
    fn non_terminal_outcomes_do_not_flash() {
        let (mut leds, frames, _) = recording_feedback(vec![1, 1]);
        leds.flash_result(&Outcome::InProgress(vec![Color::Red]))
            .unwrap();
        leds.flash_result(&Outcome::CodeUpdated).unwrap();
        assert!(frames.lock().unwrap().is_empty());
    }
}
