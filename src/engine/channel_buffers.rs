//! Per-channel FIFO, spectrum and overlap-add state.
//!
//! # Layout
//! - `input` / `side_input`: raw samples waiting for a full window. They are
//!   never windowed in place because later hops still need them.
//! - `output`: the OLA accumulator. The first `ready_len` samples are final;
//!   the following `window_size - step_size` samples are partial sums that
//!   later hops still add onto.
//! - five spectra backing [`ChannelData`].

use crate::engine::channel_data::{ChannelData, SpectrumBuffers};
use crate::engine::fft::FftEngine;
use crate::engine::storage::StorageLayout;

/// FIFO fill levels. Kept outside the `f32` slab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCursor {
    input_len: usize,
    ready_len: usize,
}

pub struct ChannelBuffers<'a> {
    layout: StorageLayout,
    input: &'a mut [f32],
    side_input: &'a mut [f32],
    output: &'a mut [f32],
    spectra: SpectrumBuffers<'a>,
    cursor: &'a mut ChannelCursor,
}

impl<'a> ChannelBuffers<'a> {
    pub(crate) fn new(
        layout: StorageLayout,
        region: &'a mut [f32],
        cursor: &'a mut ChannelCursor,
    ) -> Self {
        debug_assert_eq!(region.len(), layout.channel_len());
        let (input, rest) = region.split_at_mut(layout.window_size);
        let (side_input, rest) = rest.split_at_mut(layout.window_size);
        let (output, rest) = rest.split_at_mut(layout.output_len());
        let spectra = SpectrumBuffers::new(rest, layout.number_of_bins);
        Self {
            layout,
            input,
            side_input,
            output,
            spectra,
            cursor,
        }
    }

    /// Clears everything and primes the input FIFO with `initial_silence`
    /// zeros so the first frame only needs that many fewer new samples.
    pub fn reset(&mut self, initial_silence: usize) {
        debug_assert!(initial_silence < self.layout.window_size.max(1));
        self.input.fill(0.0);
        self.side_input.fill(0.0);
        self.output.fill(0.0);
        self.spectra.clear();
        self.cursor.input_len = initial_silence;
        self.cursor.ready_len = 0;
    }

    pub fn clear_side_channel_data(&mut self) {
        self.side_input.fill(0.0);
        self.spectra.clear_side();
    }

    pub fn input_len(&self) -> usize {
        self.cursor.input_len
    }

    pub fn ready_len(&self) -> usize {
        self.cursor.ready_len
    }

    pub fn output_capacity(&self) -> usize {
        self.output.len()
    }

    /// Samples still needed before the next frame can be analysed.
    pub fn input_space(&self) -> usize {
        self.layout.window_size - self.cursor.input_len
    }

    pub fn add_new_data(&mut self, main: &[f32], side: Option<&[f32]>) {
        let start = self.cursor.input_len;
        let end = start + main.len();
        debug_assert!(end <= self.input.len(), "input FIFO overflow");
        self.input[start..end].copy_from_slice(main);
        if let Some(side) = side {
            self.side_input[start..end].copy_from_slice(side);
        }
        self.cursor.input_len = end;
    }

    /// A full window is buffered and the accumulator can take another frame.
    pub fn frame_ready(&self) -> bool {
        self.cursor.input_len == self.layout.window_size
            && self.cursor.ready_len <= self.output.len() - self.layout.window_size
    }

    /// Windows and transforms the buffered frame. The returned view is
    /// handed to every module and then synthesised back.
    pub fn analyse(
        &mut self,
        use_side: bool,
        fft: &mut FftEngine,
        analysis_window: &[f32],
        window_size_factor: usize,
        scratch: &mut [f32],
    ) -> ChannelData<'_> {
        let side = if use_side {
            Some(&*self.side_input)
        } else {
            None
        };
        let mut data = ChannelData::new(&mut self.spectra, use_side);
        data.set_time_domain_data(
            self.input,
            side,
            analysis_window,
            window_size_factor,
            fft,
            scratch,
        );
        data
    }

    /// Windows the resynthesised frame and adds it onto the accumulator at
    /// the current write position, extended periodically over the window.
    pub fn overlap_add(&mut self, time_data: &[f32], synthesis_window: &[f32]) {
        let frame_size = self.layout.fft_size;
        let start = self.cursor.ready_len;
        debug_assert!(start + synthesis_window.len() <= self.output.len());
        let target = &mut self.output[start..start + synthesis_window.len()];
        for (out_block, window_block) in target
            .chunks_exact_mut(frame_size)
            .zip(synthesis_window.chunks_exact(frame_size))
        {
            for ((out, w), x) in out_block.iter_mut().zip(window_block).zip(time_data) {
                *out += x * w;
            }
        }
    }

    /// Scales the hop that just became final and optionally mixes in the
    /// dry input it was made from.
    ///
    /// The dry samples are the oldest hop of the input FIFO, which is about
    /// to be discarded, so they are scaled in place.
    pub fn finish_hop(&mut self, scaling: f32, dry_scaling: Option<f32>) {
        let step = self.layout.step_size;
        let start = self.cursor.ready_len;
        let hop = &mut self.output[start..start + step];
        for sample in hop.iter_mut() {
            *sample *= scaling;
        }
        if let Some(dry_scaling) = dry_scaling {
            for (out, dry) in hop.iter_mut().zip(self.input[..step].iter_mut()) {
                *dry *= dry_scaling;
                *out += *dry;
            }
        }
    }

    /// Drops the oldest hop of input and publishes one hop of output.
    pub fn advance_by_hop(&mut self, use_side: bool) {
        let step = self.layout.step_size;
        let len = self.cursor.input_len;
        debug_assert!(len >= step);
        self.input.copy_within(step..len, 0);
        if use_side {
            self.side_input.copy_within(step..len, 0);
        }
        self.cursor.input_len -= step;
        self.cursor.ready_len += step;
        debug_assert!(self.cursor.ready_len <= self.output.len());
    }

    /// Moves up to `out.len()` ready samples out of the accumulator and
    /// shifts the remaining partial sums down. Returns the count moved.
    pub fn extract_ready(&mut self, out: &mut [f32]) -> usize {
        let chunk = out.len().min(self.cursor.ready_len);
        let incomplete = self.layout.window_size - self.layout.step_size;
        out[..chunk].copy_from_slice(&self.output[..chunk]);

        let valid = self.cursor.ready_len + incomplete - chunk;
        self.output.copy_within(chunk..chunk + valid, 0);
        self.output[valid..valid + chunk].fill(0.0);
        self.cursor.ready_len -= chunk;
        chunk
    }
}
