//! Engine-wide limits and defaults.

use crate::engine::window::WindowFunction;

// Smallest supported FFT size.
pub const MIN_FFT_SIZE: u16 = 32;
// Largest supported FFT size (must fit the u16 storage factor).
pub const MAX_FFT_SIZE: u16 = 8192;
pub const DEFAULT_FFT_SIZE: u16 = 1024;

// Overlap factor range, powers of two only.
pub const MIN_OVERLAP_FACTOR: u8 = 1;
pub const MAX_OVERLAP_FACTOR: u8 = 64;
pub const DEFAULT_OVERLAP_FACTOR: u8 = 4;

// Window presumming factor range, powers of two only.
pub const MIN_WINDOW_SIZE_FACTOR: u8 = 1;
pub const MAX_WINDOW_SIZE_FACTOR: u8 = 8;
pub const DEFAULT_WINDOW_SIZE_FACTOR: u8 = 1;

pub const DEFAULT_WINDOW_FUNCTION: WindowFunction = WindowFunction::Hann;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const MAX_SAMPLE_RATE: u32 = 768_000;

pub const MAX_CHANNELS: u8 = 8;

// LFO timer fallback tempo when the host provides none: 120 BPM in 4/4.
pub const DEFAULT_BAR_DURATION_SECS: f32 = 2.0;
pub const DEFAULT_MEASURE_NUMERATOR: u8 = 4;

// LFO period limits, in bars.
pub const MIN_LFO_PERIOD_BARS: f32 = 1.0 / 64.0;
pub const MAX_LFO_PERIOD_BARS: f32 = 48.0;

pub fn is_valid_fft_size(fft_size: u16) -> bool {
    fft_size.is_power_of_two() && (MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size)
}

pub fn is_valid_overlap_factor(overlap_factor: u8) -> bool {
    overlap_factor.is_power_of_two()
        && (MIN_OVERLAP_FACTOR..=MAX_OVERLAP_FACTOR).contains(&overlap_factor)
}

pub fn is_valid_window_size_factor(window_size_factor: u8) -> bool {
    window_size_factor.is_power_of_two()
        && (MIN_WINDOW_SIZE_FACTOR..=MAX_WINDOW_SIZE_FACTOR).contains(&window_size_factor)
}
