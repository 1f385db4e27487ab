//! Storage factors and the single slab shared by all processing buffers.
//!
//! Every buffer whose size depends on the FFT size, overlap factor, window
//! size factor or channel count lives in one `f32` allocation. A resize
//! builds the complete new slab first, so a failure never disturbs the
//! storage currently in use.

use crate::engine::channel_buffers::{ChannelBuffers, ChannelCursor};
use crate::engine::constants::{
    is_valid_fft_size, is_valid_overlap_factor, is_valid_window_size_factor, MAX_CHANNELS,
    MAX_SAMPLE_RATE,
};
use crate::engine::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::mem::size_of;

/// The dimensions that determine every buffer size in the engine.
///
/// A zero field means "not known yet". Hosts often report the sample rate
/// and channel count in separate calls, so allocation waits until the
/// factors are complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageFactors {
    pub fft_size: u16,
    pub window_size_factor: u8,
    pub overlap_factor: u8,
    pub number_of_channels: u8,
    pub sample_rate: u32,
}

impl StorageFactors {
    pub fn is_complete(&self) -> bool {
        self.fft_size != 0
            && self.window_size_factor != 0
            && self.overlap_factor != 0
            && self.number_of_channels != 0
            && self.sample_rate != 0
    }

    /// Checks every known dimension. Unknown (zero) fields are accepted.
    pub fn validate(&self) -> EngineResult<()> {
        if self.fft_size != 0 && !is_valid_fft_size(self.fft_size) {
            return Err(EngineError::InvalidFftSize(self.fft_size));
        }
        if self.overlap_factor != 0 && !is_valid_overlap_factor(self.overlap_factor) {
            return Err(EngineError::InvalidOverlapFactor(self.overlap_factor));
        }
        if self.overlap_factor as u16 > self.fft_size && self.fft_size != 0 {
            return Err(EngineError::InvalidOverlapFactor(self.overlap_factor));
        }
        if self.window_size_factor != 0 && !is_valid_window_size_factor(self.window_size_factor) {
            return Err(EngineError::InvalidWindowSizeFactor(
                self.window_size_factor,
            ));
        }
        if self.number_of_channels > MAX_CHANNELS {
            return Err(EngineError::InvalidChannelCount {
                main: self.number_of_channels,
                side: 0,
            });
        }
        if self.sample_rate > MAX_SAMPLE_RATE {
            return Err(EngineError::InvalidSampleRate(self.sample_rate));
        }
        Ok(())
    }

    /// True when both factor sets need exactly the same storage, which is
    /// everything except the sample rate.
    pub fn same_storage(&self, other: &StorageFactors) -> bool {
        self.fft_size == other.fft_size
            && self.window_size_factor == other.window_size_factor
            && self.overlap_factor == other.overlap_factor
            && self.number_of_channels == other.number_of_channels
    }

    pub fn with_sample_rate(self, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..self
        }
    }

    pub fn window_size(&self) -> usize {
        self.fft_size as usize * self.window_size_factor as usize
    }

    pub fn step_size(&self) -> usize {
        self.fft_size as usize / self.overlap_factor.max(1) as usize
    }

    pub fn number_of_bins(&self) -> usize {
        self.fft_size as usize / 2 + 1
    }
}

/// Offsets of every sub-buffer inside the slab, derived from complete
/// storage factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageLayout {
    pub fft_size: usize,
    pub window_size: usize,
    pub step_size: usize,
    pub number_of_bins: usize,
    pub channels: usize,
}

impl StorageLayout {
    pub fn new(factors: &StorageFactors) -> Self {
        Self {
            fft_size: factors.fft_size as usize,
            window_size: factors.window_size(),
            step_size: factors.step_size(),
            number_of_bins: factors.number_of_bins(),
            channels: factors.number_of_channels as usize,
        }
    }

    /// Output OLA accumulator: one window of new data on top of the
    /// `window_size - step_size` samples still waiting for later hops.
    pub fn output_len(&self) -> usize {
        2 * self.window_size - self.step_size
    }

    /// Reals followed by imaginaries, or amplitudes followed by phases.
    pub fn spectrum_len(&self) -> usize {
        2 * self.number_of_bins
    }

    /// Main input, side input, output OLA and five spectra.
    pub fn channel_len(&self) -> usize {
        2 * self.window_size + self.output_len() + 5 * self.spectrum_len()
    }

    /// Two windows, the frame scratch and the interleaving scratch.
    pub fn shared_len(&self) -> usize {
        3 * self.window_size + 3 * self.channels * self.fft_size
    }

    pub fn total_len(&self) -> usize {
        self.shared_len() + self.channels * self.channel_len()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.total_len() * size_of::<f32>() + self.channels * size_of::<ChannelCursor>()
    }
}

/// Interleaving scratch, one FFT-sized block per channel.
pub struct InterleaveScratch<'a> {
    pub main: &'a mut [f32],
    pub side: &'a mut [f32],
    pub output: &'a mut [f32],
}

/// Per-channel part of the slab.
pub struct ChannelSet<'a> {
    layout: StorageLayout,
    region: &'a mut [f32],
    cursors: &'a mut [ChannelCursor],
}

impl<'a> ChannelSet<'a> {
    pub fn len(&self) -> usize {
        self.layout.channels
    }

    pub fn is_empty(&self) -> bool {
        self.layout.channels == 0
    }

    pub fn channel(&mut self, index: usize) -> ChannelBuffers<'_> {
        let len = self.layout.channel_len();
        let region = &mut self.region[index * len..(index + 1) * len];
        ChannelBuffers::new(self.layout, region, &mut self.cursors[index])
    }
}

/// Borrowed partition of the slab. Fields are public so callers can borrow
/// the windows, the scratch and the channels at the same time.
pub struct StorageView<'a> {
    pub layout: StorageLayout,
    pub analysis_window: &'a mut [f32],
    pub synthesis_window: &'a mut [f32],
    /// One window of time-domain scratch.
    pub scratch: &'a mut [f32],
    pub interleave: InterleaveScratch<'a>,
    pub channels: ChannelSet<'a>,
}

impl<'a> StorageView<'a> {
    pub fn number_of_channels(&self) -> usize {
        self.layout.channels
    }

    pub fn channel(&mut self, index: usize) -> ChannelBuffers<'_> {
        self.channels.channel(index)
    }
}

fn carve<'a>(rest: &mut &'a mut [f32], len: usize) -> &'a mut [f32] {
    let (head, tail) = std::mem::take(rest).split_at_mut(len);
    *rest = tail;
    head
}

/// Owner of the slab.
#[derive(Default)]
pub struct SharedStorage {
    layout: StorageLayout,
    slab: Vec<f32>,
    cursors: Vec<ChannelCursor>,
}

impl SharedStorage {
    /// Allocates zeroed storage for `layout`, reporting allocation failure
    /// instead of aborting.
    pub fn allocate(layout: StorageLayout) -> EngineResult<Self> {
        let out_of_memory = || EngineError::OutOfMemory {
            required: layout.size_in_bytes(),
            available: 0,
        };

        let mut slab = Vec::new();
        slab.try_reserve_exact(layout.total_len())
            .map_err(|_| out_of_memory())?;
        slab.resize(layout.total_len(), 0.0);

        let mut cursors = Vec::new();
        cursors
            .try_reserve_exact(layout.channels)
            .map_err(|_| out_of_memory())?;
        cursors.resize(layout.channels, ChannelCursor::default());

        Ok(Self {
            layout,
            slab,
            cursors,
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn is_allocated(&self) -> bool {
        !self.slab.is_empty()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.slab.len() * size_of::<f32>() + self.cursors.len() * size_of::<ChannelCursor>()
    }

    pub fn view(&mut self) -> StorageView<'_> {
        let layout = self.layout;
        let mut rest = self.slab.as_mut_slice();
        let analysis_window = carve(&mut rest, layout.window_size);
        let synthesis_window = carve(&mut rest, layout.window_size);
        let scratch = carve(&mut rest, layout.window_size);
        let block = layout.channels * layout.fft_size;
        let interleave = InterleaveScratch {
            main: carve(&mut rest, block),
            side: carve(&mut rest, block),
            output: carve(&mut rest, block),
        };
        StorageView {
            layout,
            analysis_window,
            synthesis_window,
            scratch,
            interleave,
            channels: ChannelSet {
                layout,
                region: rest,
                cursors: self.cursors.as_mut_slice(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factors() -> StorageFactors {
        StorageFactors {
            fft_size: 1024,
            window_size_factor: 1,
            overlap_factor: 4,
            number_of_channels: 2,
            sample_rate: 48_000,
        }
    }

    #[test]
    fn test_completeness() {
        assert!(factors().is_complete());
        let partial = StorageFactors {
            sample_rate: 0,
            ..factors()
        };
        assert!(!partial.is_complete());
        assert!(partial.validate().is_ok());
        assert!(!StorageFactors::default().is_complete());
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(factors(), factors());
        let other = factors().with_sample_rate(44_100);
        assert_ne!(factors(), other);
        assert!(factors().same_storage(&other));
    }

    #[test]
    fn test_validation_rejects_bad_dimensions() {
        let bad_fft = StorageFactors {
            fft_size: 1000,
            ..factors()
        };
        assert_eq!(bad_fft.validate(), Err(EngineError::InvalidFftSize(1000)));
        let bad_overlap = StorageFactors {
            overlap_factor: 3,
            ..factors()
        };
        assert_eq!(
            bad_overlap.validate(),
            Err(EngineError::InvalidOverlapFactor(3))
        );
        let too_many = StorageFactors {
            number_of_channels: MAX_CHANNELS + 1,
            ..factors()
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_layout_sizes() {
        let layout = StorageLayout::new(&factors());
        assert_eq!(layout.window_size, 1024);
        assert_eq!(layout.step_size, 256);
        assert_eq!(layout.number_of_bins, 513);
        assert_eq!(layout.output_len(), 2048 - 256);
        assert_eq!(
            layout.total_len(),
            layout.shared_len() + 2 * layout.channel_len()
        );
    }

    #[test]
    fn test_view_partitions_whole_slab() {
        let layout = StorageLayout::new(&factors());
        let mut storage = SharedStorage::allocate(layout).unwrap();
        assert!(storage.is_allocated());
        let mut view = storage.view();
        assert_eq!(view.analysis_window.len(), 1024);
        assert_eq!(view.synthesis_window.len(), 1024);
        assert_eq!(view.interleave.main.len(), 2 * 1024);
        assert_eq!(view.number_of_channels(), 2);
        let channel = view.channel(1);
        assert_eq!(channel.output_capacity(), layout.output_len());
    }
}
