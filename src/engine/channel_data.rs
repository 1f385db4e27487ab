//! Frequency-domain view of one channel's current frame.
//!
//! Holds the spectrum both as real/imaginary pairs (ReIm) and as
//! amplitude/phase pairs (AmPh) and converts between them on demand. Two
//! freshness counters record which representation was written last: asking
//! for one kind converts from the other only if it is stale, and asking for
//! mutable access bumps the counter so the other kind becomes stale.
//!
//! Side-chain spectra are computed for every frame that has a side input
//! and are read-only for modules.

use crate::engine::fft::FftEngine;

/// The five spectrum arrays of one channel, each `2 * bins` long.
pub struct SpectrumBuffers<'a> {
    main_reim: &'a mut [f32],
    main_amph: &'a mut [f32],
    side_reim: &'a mut [f32],
    side_amph: &'a mut [f32],
    saved: &'a mut [f32],
    bins: usize,
}

impl<'a> SpectrumBuffers<'a> {
    pub(crate) fn new(region: &'a mut [f32], bins: usize) -> Self {
        let len = 2 * bins;
        debug_assert_eq!(region.len(), 5 * len);
        let (main_reim, rest) = region.split_at_mut(len);
        let (main_amph, rest) = rest.split_at_mut(len);
        let (side_reim, rest) = rest.split_at_mut(len);
        let (side_amph, saved) = rest.split_at_mut(len);
        Self {
            main_reim,
            main_amph,
            side_reim,
            side_amph,
            saved,
            bins,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.main_reim.fill(0.0);
        self.main_amph.fill(0.0);
        self.saved.fill(0.0);
        self.clear_side();
    }

    pub(crate) fn clear_side(&mut self) {
        self.side_reim.fill(0.0);
        self.side_amph.fill(0.0);
    }
}

/// Read-only real/imaginary spectrum.
#[derive(Clone, Copy)]
pub struct ReIm<'a> {
    pub reals: &'a [f32],
    pub imags: &'a [f32],
}

pub struct ReImMut<'a> {
    pub reals: &'a mut [f32],
    pub imags: &'a mut [f32],
}

/// Read-only amplitude/phase spectrum.
#[derive(Clone, Copy)]
pub struct AmPh<'a> {
    pub amps: &'a [f32],
    pub phases: &'a [f32],
}

pub struct AmPhMut<'a> {
    pub amps: &'a mut [f32],
    pub phases: &'a mut [f32],
}

pub struct ChannelData<'a> {
    main_reim: &'a mut [f32],
    main_amph: &'a mut [f32],
    side_reim: &'a mut [f32],
    side_amph: &'a mut [f32],
    saved: &'a mut [f32],
    bins: usize,
    has_side: bool,
    reim_freshness: u32,
    amph_freshness: u32,
}

impl<'a> ChannelData<'a> {
    pub(crate) fn new(spectra: &'a mut SpectrumBuffers<'_>, has_side: bool) -> Self {
        Self {
            main_reim: &mut *spectra.main_reim,
            main_amph: &mut *spectra.main_amph,
            side_reim: &mut *spectra.side_reim,
            side_amph: &mut *spectra.side_amph,
            saved: &mut *spectra.saved,
            bins: spectra.bins,
            has_side,
            reim_freshness: 0,
            amph_freshness: 0,
        }
    }

    pub fn number_of_bins(&self) -> usize {
        self.bins
    }

    pub fn has_side_channel(&self) -> bool {
        self.has_side
    }

    /// Windows (and presums) the time-domain frames and transforms them.
    pub(crate) fn set_time_domain_data(
        &mut self,
        main: &[f32],
        side: Option<&[f32]>,
        window: &[f32],
        window_size_factor: usize,
        fft: &mut FftEngine,
        scratch: &mut [f32],
    ) {
        let frame = &mut scratch[..fft.size()];

        presum(main, window, frame);
        let (reals, imags) = self.main_reim.split_at_mut(self.bins);
        fft.forward(frame, reals, imags, window_size_factor == 1);
        self.reim_freshness = 1;
        self.amph_freshness = 0;

        if let Some(side) = side {
            presum(side, window, frame);
            let (reals, imags) = self.side_reim.split_at_mut(self.bins);
            fft.forward(frame, reals, imags, window_size_factor == 1);
            reim_to_amph(self.side_reim, self.side_amph, self.bins);
        }
    }

    /// Inverse-transforms the (possibly modified) spectrum into `time`.
    pub(crate) fn synthesise(&mut self, fft: &mut FftEngine, time: &mut [f32], shift: bool) {
        self.update_reim();
        let (reals, imags) = self.main_reim.split_at(self.bins);
        fft.inverse(reals, imags, time, shift);
    }

    fn reim_is_fresh(&self) -> bool {
        self.reim_freshness >= self.amph_freshness
    }

    fn update_amph(&mut self) {
        if self.amph_freshness < self.reim_freshness {
            reim_to_amph(self.main_reim, self.main_amph, self.bins);
            self.amph_freshness = self.reim_freshness;
        }
    }

    fn update_reim(&mut self) {
        if self.reim_freshness < self.amph_freshness {
            amph_to_reim(self.main_amph, self.main_reim, self.bins);
            self.reim_freshness = self.amph_freshness;
        }
    }

    pub fn reim(&mut self) -> ReIm<'_> {
        self.update_reim();
        let (reals, imags) = self.main_reim.split_at(self.bins);
        ReIm { reals, imags }
    }

    pub fn reim_mut(&mut self) -> ReImMut<'_> {
        self.update_reim();
        self.reim_freshness += 1;
        let (reals, imags) = self.main_reim.split_at_mut(self.bins);
        ReImMut { reals, imags }
    }

    pub fn amph(&mut self) -> AmPh<'_> {
        self.update_amph();
        let (amps, phases) = self.main_amph.split_at(self.bins);
        AmPh { amps, phases }
    }

    pub fn amph_mut(&mut self) -> AmPhMut<'_> {
        self.update_amph();
        self.amph_freshness += 1;
        let (amps, phases) = self.main_amph.split_at_mut(self.bins);
        AmPhMut { amps, phases }
    }

    /// Side-chain spectrum, all zeros when there is no side input.
    pub fn side_reim(&self) -> ReIm<'_> {
        let (reals, imags) = self.side_reim.split_at(self.bins);
        ReIm { reals, imags }
    }

    pub fn side_amph(&self) -> AmPh<'_> {
        let (amps, phases) = self.side_amph.split_at(self.bins);
        AmPh { amps, phases }
    }

    /// Keeps a copy of the current spectrum for a later wet/dry blend.
    pub(crate) fn save_for_blending(&mut self) {
        self.update_reim();
        self.saved.copy_from_slice(self.main_reim);
    }

    /// `current = saved + wet * (current - saved)`, in the ReIm domain.
    pub(crate) fn blend_with_saved(&mut self, wet: f32) {
        self.update_reim();
        for (current, dry) in self.main_reim.iter_mut().zip(self.saved.iter()) {
            *current = dry + wet * (*current - dry);
        }
        self.reim_freshness += 1;
    }

    /// Scales whichever representation is current.
    pub(crate) fn amplify(&mut self, gain: f32) {
        if self.reim_is_fresh() {
            for value in self.main_reim.iter_mut() {
                *value *= gain;
            }
            self.reim_freshness += 1;
        } else {
            for amp in self.main_amph[..self.bins].iter_mut() {
                *amp *= gain;
            }
        }
    }
}

fn presum(input: &[f32], window: &[f32], frame: &mut [f32]) {
    let frame_size = frame.len();
    for ((out, x), w) in frame.iter_mut().zip(input).zip(window) {
        *out = x * w;
    }
    for (block, window_block) in input
        .chunks_exact(frame_size)
        .zip(window.chunks_exact(frame_size))
        .skip(1)
    {
        for ((out, x), w) in frame.iter_mut().zip(block).zip(window_block) {
            *out += x * w;
        }
    }
}

fn reim_to_amph(reim: &[f32], amph: &mut [f32], bins: usize) {
    let (reals, imags) = reim.split_at(bins);
    let (amps, phases) = amph.split_at_mut(bins);
    for i in 0..bins {
        amps[i] = reals[i].hypot(imags[i]);
        phases[i] = imags[i].atan2(reals[i]);
    }
}

fn amph_to_reim(amph: &[f32], reim: &mut [f32], bins: usize) {
    let (amps, phases) = amph.split_at(bins);
    let (reals, imags) = reim.split_at_mut(bins);
    for i in 0..bins {
        let (sin, cos) = phases[i].sin_cos();
        reals[i] = amps[i] * cos;
        imags[i] = amps[i] * sin;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_data<F: FnOnce(&mut ChannelData)>(bins: usize, f: F) {
        let mut region = vec![0.0f32; 10 * bins];
        let mut spectra = SpectrumBuffers::new(&mut region, bins);
        let mut data = ChannelData::new(&mut spectra, false);
        data.reim_freshness = 1;
        f(&mut data);
    }

    #[test]
    fn test_amph_conversion_is_lazy() {
        with_data(3, |data| {
            {
                let reim = data.reim_mut();
                reim.reals.copy_from_slice(&[3.0, 0.0, -1.0]);
                reim.imags.copy_from_slice(&[4.0, 2.0, 0.0]);
            }
            let amph = data.amph();
            assert!((amph.amps[0] - 5.0).abs() < 1e-6);
            assert!((amph.amps[1] - 2.0).abs() < 1e-6);
            assert!((amph.phases[1] - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
            assert!((amph.phases[2] - std::f32::consts::PI).abs() < 1e-6);
        });
    }

    #[test]
    fn test_amph_write_marks_reim_stale() {
        with_data(2, |data| {
            {
                let amph = data.amph_mut();
                amph.amps.copy_from_slice(&[2.0, 1.0]);
                amph.phases.copy_from_slice(&[0.0, std::f32::consts::FRAC_PI_2]);
            }
            let reim = data.reim();
            assert!((reim.reals[0] - 2.0).abs() < 1e-6);
            assert!(reim.reals[1].abs() < 1e-6);
            assert!((reim.imags[1] - 1.0).abs() < 1e-6);
        });
    }

    #[test]
    fn test_blend_with_saved() {
        with_data(2, |data| {
            {
                let reim = data.reim_mut();
                reim.reals.copy_from_slice(&[1.0, 1.0]);
            }
            data.save_for_blending();
            {
                let reim = data.reim_mut();
                reim.reals.copy_from_slice(&[3.0, 5.0]);
            }
            data.blend_with_saved(0.5);
            let reim = data.reim();
            assert_eq!(reim.reals, &[2.0, 3.0]);
        });
    }

    #[test]
    fn test_amplify_follows_fresh_representation() {
        with_data(2, |data| {
            {
                let amph = data.amph_mut();
                amph.amps.copy_from_slice(&[1.0, 2.0]);
            }
            data.amplify(2.0);
            assert_eq!(data.amph().amps, &[2.0, 4.0]);
            assert!((data.reim().reals[1] - 4.0).abs() < 1e-6);
        });
    }

    #[test]
    fn test_presum_folds_frames() {
        let input = [1.0, 2.0, 3.0, 4.0];
        let window = [1.0, 1.0, 0.5, 0.5];
        let mut frame = [0.0; 2];
        presum(&input, &window, &mut frame);
        assert_eq!(frame, [2.5, 4.0]);
    }
}
