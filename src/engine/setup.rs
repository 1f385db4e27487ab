//! Read-only snapshot of the active engine configuration plus the derived
//! quantities modules need (bin mapping, hop timing, latency).

use crate::engine::constants::{
    DEFAULT_FFT_SIZE, DEFAULT_OVERLAP_FACTOR, DEFAULT_SAMPLE_RATE, DEFAULT_WINDOW_FUNCTION,
    DEFAULT_WINDOW_SIZE_FACTOR,
};
use crate::engine::storage::StorageFactors;
use crate::engine::window::{WindowFunction, WolaMetrics};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setup {
    fft_size: u16,
    overlap_factor: u8,
    window_size_factor: u8,
    sample_rate: u32,
    window_function: WindowFunction,
    channels: u8,
    side_channels: u8,
    wola: WolaMetrics,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            overlap_factor: DEFAULT_OVERLAP_FACTOR,
            window_size_factor: DEFAULT_WINDOW_SIZE_FACTOR,
            sample_rate: DEFAULT_SAMPLE_RATE,
            window_function: DEFAULT_WINDOW_FUNCTION,
            channels: 0,
            side_channels: 0,
            wola: WolaMetrics::default(),
        }
    }
}

impl Setup {
    pub(crate) fn from_factors(
        factors: &StorageFactors,
        window_function: WindowFunction,
        side_channels: u8,
        wola: WolaMetrics,
    ) -> Self {
        debug_assert!(factors.is_complete());
        debug_assert!(side_channels <= factors.number_of_channels);
        Self {
            fft_size: factors.fft_size,
            overlap_factor: factors.overlap_factor,
            window_size_factor: factors.window_size_factor,
            sample_rate: factors.sample_rate,
            window_function,
            channels: factors.number_of_channels,
            side_channels,
            wola,
        }
    }

    pub(crate) fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub(crate) fn set_side_channels(&mut self, side_channels: u8) {
        debug_assert!(side_channels <= self.channels);
        self.side_channels = side_channels;
    }

    pub(crate) fn set_window(&mut self, window_function: WindowFunction, wola: WolaMetrics) {
        self.window_function = window_function;
        self.wola = wola;
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size as usize
    }

    pub fn overlap_factor(&self) -> u8 {
        self.overlap_factor
    }

    pub fn window_size_factor(&self) -> u8 {
        self.window_size_factor
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn window_function(&self) -> WindowFunction {
        self.window_function
    }

    pub fn number_of_channels(&self) -> u8 {
        self.channels
    }

    pub fn number_of_side_channels(&self) -> u8 {
        self.side_channels
    }

    pub fn wola_gain(&self) -> f32 {
        self.wola.gain
    }

    pub fn window_ripple(&self) -> f32 {
        self.wola.ripple
    }

    pub fn number_of_bins(&self) -> usize {
        self.fft_size() / 2 + 1
    }

    pub fn step_size(&self) -> usize {
        self.fft_size() / self.overlap_factor as usize
    }

    pub fn window_size(&self) -> usize {
        self.fft_size() * self.window_size_factor as usize
    }

    pub fn frequency_range_per_bin(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Maps a 0..1 fraction of Nyquist to a bin index.
    pub fn normalised_frequency_to_bin(&self, normalised: f32) -> usize {
        let bin = (normalised.clamp(0.0, 1.0) * (self.fft_size() / 2) as f32).round();
        (bin as usize).min(self.number_of_bins() - 1)
    }

    pub fn frequency_in_hz_to_bin(&self, hz: f32) -> usize {
        let bin = (hz.max(0.0) / self.frequency_range_per_bin()).round();
        (bin as usize).min(self.number_of_bins() - 1)
    }

    pub fn normalised_frequency_to_hz(&self, normalised: f32) -> f32 {
        normalised * self.sample_rate as f32 / 2.0
    }

    /// Hops needed to cover `milliseconds`, rounded up.
    pub fn milliseconds_to_steps(&self, milliseconds: f32) -> u32 {
        self.seconds_to_steps(milliseconds / 1000.0)
    }

    pub fn seconds_to_steps(&self, seconds: f32) -> u32 {
        (seconds.max(0.0) / self.step_time()).ceil() as u32
    }

    /// Duration of one hop in seconds.
    pub fn step_time(&self) -> f32 {
        self.step_size() as f32 / self.sample_rate as f32
    }

    /// Duration of one analysis window in seconds.
    pub fn frame_time(&self) -> f32 {
        self.window_size() as f32 / self.sample_rate as f32
    }

    pub fn latency_in_samples(&self) -> usize {
        self.window_size() - self.step_size()
    }

    pub fn latency_in_milliseconds(&self) -> f32 {
        self.latency_in_samples() as f32 * 1000.0 / self.sample_rate as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Setup {
        let factors = StorageFactors {
            fft_size: 2048,
            window_size_factor: 1,
            overlap_factor: 4,
            number_of_channels: 2,
            sample_rate: 44_100,
        };
        Setup::from_factors(&factors, WindowFunction::Hann, 1, WolaMetrics::default())
    }

    #[test]
    fn test_derived_sizes() {
        let s = setup();
        assert_eq!(s.number_of_bins(), 1025);
        assert_eq!(s.step_size(), 512);
        assert_eq!(s.window_size(), 2048);
        assert_eq!(s.latency_in_samples(), 1536);
    }

    #[test]
    fn test_frequency_mapping() {
        let s = setup();
        assert_eq!(s.normalised_frequency_to_bin(0.0), 0);
        assert_eq!(s.normalised_frequency_to_bin(1.0), 1024);
        assert_eq!(s.normalised_frequency_to_bin(0.5), 512);
        assert_eq!(s.frequency_in_hz_to_bin(440.0), 20);
        assert!((s.normalised_frequency_to_hz(1.0) - 22_050.0).abs() < 1e-3);
    }

    #[test]
    fn test_time_conversions_round_up() {
        let s = setup();
        // one hop is ~11.6 ms
        assert_eq!(s.milliseconds_to_steps(10.0), 1);
        assert_eq!(s.milliseconds_to_steps(12.0), 2);
        assert_eq!(s.seconds_to_steps(0.0), 0);
        assert!((s.frame_time() - 2048.0 / 44_100.0).abs() < 1e-6);
    }
}
