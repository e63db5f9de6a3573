//! Host-side error signal from the summed lock-in pixel stream.
//!
//! While the RPU runs the loop on raw accumulator sums, the host receives
//! "summed" pixels from the regular lock-in pipeline: each one the average of
//! NSW raw pixels, with a mean in-phase and mean quadrature value per input
//! channel. At zero intermediate frequency the amplitude is simply
//! `|I + iQ|`.
//!
//! The two paths normalize differently (fixed-point accumulator times the
//! programmed scale on the RPU, floating point on the host) and sample at
//! different moments, so their amplitudes only track each other
//! approximately. [`CrossCheck`] compares them by order of magnitude.

use std::collections::BTreeMap;

use crossbeam_channel::Receiver;
use num_complex::Complex32;

use crate::error::{FeedbackError, FeedbackResult};

/// Mean in-phase and quadrature value of one input channel over one window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelRecord {
    pub mean_i: f32,
    pub mean_q: f32,
}

impl PixelRecord {
    pub fn new(mean_i: f32, mean_q: f32) -> Self {
        Self { mean_i, mean_q }
    }

    /// Complex amplitude `I + iQ`.
    pub fn as_complex(&self) -> Complex32 {
        Complex32::new(self.mean_i, self.mean_q)
    }
}

/// Squared magnitude of a pixel record's complex amplitude.
pub fn amplitude_squared(record: &PixelRecord) -> f32 {
    record.as_complex().norm_sqr()
}

/// One element of the pixel stream: a record per input channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PixelBatch {
    /// Position in the stream, increasing by one per batch
    pub sequence: u64,
    channels: BTreeMap<u8, PixelRecord>,
}

impl PixelBatch {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            channels: BTreeMap::new(),
        }
    }

    pub fn with_channel(mut self, channel: u8, record: PixelRecord) -> Self {
        self.channels.insert(channel, record);
        self
    }

    pub fn insert(&mut self, channel: u8, record: PixelRecord) {
        self.channels.insert(channel, record);
    }

    pub fn channel(&self, channel: u8) -> Option<&PixelRecord> {
        self.channels.get(&channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = (u8, &PixelRecord)> {
        self.channels.iter().map(|(ch, rec)| (*ch, rec))
    }
}

/// Turns pixel batches into amplitude² for one input channel.
#[derive(Debug, Clone)]
pub struct PixelStreamAggregator {
    channel: u8,
    processed: u64,
    last: Option<f32>,
}

impl PixelStreamAggregator {
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            processed: 0,
            last: None,
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Number of batches successfully processed.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Amplitude² of the most recently processed batch.
    pub fn last_amplitude_squared(&self) -> Option<f32> {
        self.last
    }

    /// Amplitude² of this aggregator's channel in `batch`.
    ///
    /// # Errors
    ///
    /// [`FeedbackError::MissingChannel`] if the batch carries no record for the channel.
    pub fn process(&mut self, batch: &PixelBatch) -> FeedbackResult<f32> {
        let record = batch
            .channel(self.channel)
            .ok_or(FeedbackError::MissingChannel(self.channel))?;
        let amp2 = amplitude_squared(record);
        self.processed += 1;
        self.last = Some(amp2);
        Ok(amp2)
    }

    /// Drain everything currently queued and keep only the newest batch.
    ///
    /// Returns `None` if nothing was queued. Never blocks.
    pub fn latest(receiver: &Receiver<PixelBatch>) -> Option<PixelBatch> {
        receiver.try_iter().last()
    }
}

/// Host and RPU amplitude² taken at roughly the same time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossCheck {
    /// Amplitude² from the pixel stream
    pub host: f32,
    /// Amplitude² reported by the RPU status register
    pub rpu: f32,
}

impl CrossCheck {
    pub fn new(host: f32, rpu: f32) -> Self {
        Self { host, rpu }
    }

    /// `host / rpu`, or `None` unless both are finite and strictly positive.
    pub fn ratio(&self) -> Option<f64> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        if valid(self.host) && valid(self.rpu) {
            Some(self.host as f64 / self.rpu as f64)
        } else {
            None
        }
    }

    /// Distance between the two values in decades.
    pub fn decades_apart(&self) -> Option<f64> {
        self.ratio().map(|r| r.log10().abs())
    }

    /// Whether both values are within `max_decades` orders of magnitude.
    pub fn tracks(&self, max_decades: f64) -> bool {
        self.decades_apart().is_some_and(|d| d <= max_decades)
    }
}
