//! Real-signal FFT wrapper over `rustfft`.
//!
//! Spectra are exchanged as separate real and imaginary arrays of
//! `size / 2 + 1` bins. The inverse is normalised by `1 / size` so a
//! forward/inverse pair is an identity.

use crate::engine::error::{EngineError, EngineResult};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::mem::size_of;
use std::sync::Arc;

pub struct FftEngine {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl FftEngine {
    pub fn new(size: usize) -> EngineResult<Self> {
        debug_assert!(size.is_power_of_two());
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        let zero = Complex::new(0.0, 0.0);
        let out_of_memory = |len: usize| EngineError::OutOfMemory {
            required: len * size_of::<Complex<f32>>(),
            available: 0,
        };
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| out_of_memory(size))?;
        buffer.resize(size, zero);
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(scratch_len)
            .map_err(|_| out_of_memory(scratch_len))?;
        scratch.resize(scratch_len, zero);

        Ok(Self {
            size,
            forward,
            inverse,
            buffer,
            scratch,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Heap held by the work buffers, counted against the storage budget.
    pub fn heap_bytes(&self) -> usize {
        (self.buffer.len() + self.scratch.len()) * size_of::<Complex<f32>>()
    }

    /// Transforms `time` (`size` samples) into `reals`/`imags`.
    ///
    /// With `shift` the frame is rotated by half its length first, which puts
    /// the window centre at time zero.
    pub fn forward(&mut self, time: &[f32], reals: &mut [f32], imags: &mut [f32], shift: bool) {
        let n = self.size;
        let rotation = if shift { n / 2 } else { 0 };
        for (j, slot) in self.buffer.iter_mut().enumerate() {
            *slot = Complex::new(time[(j + rotation) % n], 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        for (k, bin) in self.buffer[..=n / 2].iter().enumerate() {
            reals[k] = bin.re;
            imags[k] = bin.im;
        }
    }

    /// Rebuilds the Hermitian spectrum from `reals`/`imags` and writes the
    /// normalised real signal into `time`.
    pub fn inverse(&mut self, reals: &[f32], imags: &[f32], time: &mut [f32], shift: bool) {
        let n = self.size;
        let nyq = n / 2;
        for k in 0..=nyq {
            self.buffer[k] = Complex::new(reals[k], imags[k]);
        }
        self.buffer[0].im = 0.0;
        self.buffer[nyq].im = 0.0;
        for k in 1..nyq {
            self.buffer[n - k] = self.buffer[k].conj();
        }
        self.inverse
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let norm = 1.0 / n as f32;
        let rotation = if shift { nyq } else { 0 };
        for (i, out) in time[..n].iter_mut().enumerate() {
            *out = self.buffer[(i + rotation) % n].re * norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_inverse_identity() {
        for shift in [false, true] {
            let mut fft = FftEngine::new(64).unwrap();
            let input: Vec<f32> = (0..64).map(|i| ((i * 7) % 13) as f32 - 6.0).collect();
            let mut reals = vec![0.0; 33];
            let mut imags = vec![0.0; 33];
            let mut output = vec![0.0; 64];
            fft.forward(&input, &mut reals, &mut imags, shift);
            fft.inverse(&reals, &imags, &mut output, shift);
            for (a, b) in input.iter().zip(&output) {
                assert!((a - b).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_cosine_lands_in_its_bin() {
        let n = 128;
        let mut fft = FftEngine::new(n).unwrap();
        let input: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 8.0 * i as f32 / n as f32).cos())
            .collect();
        let mut reals = vec![0.0; n / 2 + 1];
        let mut imags = vec![0.0; n / 2 + 1];
        fft.forward(&input, &mut reals, &mut imags, false);
        assert!((reals[8] - n as f32 / 2.0).abs() < 1e-2);
        assert!(reals[7].abs() < 1e-2);
        assert!(fft.heap_bytes() >= n * size_of::<Complex<f32>>());
    }
}
