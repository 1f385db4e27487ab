//! Analysis/synthesis window pairs for weighted overlap-add.
//!
//! All windows are "DFT-even": their period equals the frame length, so the
//! last sample equals the second one rather than the first. They are computed
//! in double precision and stored as `f32`.
//!
//! # Synthesis window policy
//! The product of the analysis and synthesis windows has to satisfy the COLA
//! condition at the configured hop size. By default the synthesis window is
//! `Hann / analysis`, which makes the product a Hann window. Windows that do
//! not behave with that ratio are special-cased by [`synthesis_policy`].
//!
//! # Presumming
//! With a window size factor above one both windows get a `sin(x)/x`
//! correction. The analysis window uses the FFT size as the sinc period and
//! the synthesis window uses the step size.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// Gaussian window width.
const GAUSSIAN_ALPHA: f64 = 3.0;
// Hamming coefficients.
const HAMMING_A0: f64 = 0.54;
const HAMMING_A1: f64 = 0.46;
// 5-term flat top coefficients.
const FLAT_TOP: [f64; 5] = [
    0.215_578_948,
    0.416_631_580,
    0.277_263_158,
    0.083_578_947,
    0.006_947_368,
];
// Classic Blackman (alpha = 0.16).
const BLACKMAN_ALPHA: f64 = 0.16;
// Minimum 4-term Blackman-Harris.
const BLACKMAN_HARRIS: [f64; 4] = [0.358_75, 0.488_29, 0.141_28, 0.011_68];

/// Window shapes selectable by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WindowFunction {
    Rectangle,
    Triangle,
    Hann,
    Hamming,
    Blackman,
    BlackmanHarris,
    Gaussian,
    FlatTop,
    Welch,
}

impl WindowFunction {
    pub const ALL: [WindowFunction; 9] = [
        WindowFunction::Rectangle,
        WindowFunction::Triangle,
        WindowFunction::Hann,
        WindowFunction::Hamming,
        WindowFunction::Blackman,
        WindowFunction::BlackmanHarris,
        WindowFunction::Gaussian,
        WindowFunction::FlatTop,
        WindowFunction::Welch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WindowFunction::Rectangle => "Rectangle",
            WindowFunction::Triangle => "Triangle",
            WindowFunction::Hann => "Hann",
            WindowFunction::Hamming => "Hamming",
            WindowFunction::Blackman => "Blackman",
            WindowFunction::BlackmanHarris => "Blackman-Harris",
            WindowFunction::Gaussian => "Gaussian",
            WindowFunction::FlatTop => "Flat top",
            WindowFunction::Welch => "Welch",
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl Default for WindowFunction {
    fn default() -> Self {
        WindowFunction::Hann
    }
}

/// Fills `window` with one period of `function`.
pub fn calculate_window(window: &mut [f32], function: WindowFunction) {
    let size = window.len() as f64;
    let half = size / 2.0;
    let dw = 2.0 * PI / size;

    for (i, sample) in window.iter_mut().enumerate() {
        let fi = i as f64;
        let w = fi * dw;
        let value = match function {
            WindowFunction::Rectangle => 1.0,
            WindowFunction::Triangle => {
                if fi < half {
                    2.0 * fi / size
                } else {
                    2.0 * (1.0 - fi / size)
                }
            }
            WindowFunction::Gaussian => {
                let t = GAUSSIAN_ALPHA * (fi - half) / half;
                (-0.5 * t * t).exp()
            }
            WindowFunction::Hamming => HAMMING_A0 - HAMMING_A1 * w.cos(),
            WindowFunction::Hann => 0.5 * (1.0 - w.cos()),
            WindowFunction::FlatTop => {
                FLAT_TOP[0] - FLAT_TOP[1] * w.cos() + FLAT_TOP[2] * (2.0 * w).cos()
                    - FLAT_TOP[3] * (3.0 * w).cos()
                    + FLAT_TOP[4] * (4.0 * w).cos()
            }
            WindowFunction::Welch => {
                let t = (fi - half) / half;
                1.0 - t * t
            }
            WindowFunction::Blackman => {
                let a0 = (1.0 - BLACKMAN_ALPHA) / 2.0;
                let a1 = 0.5;
                let a2 = BLACKMAN_ALPHA / 2.0;
                a0 - a1 * w.cos() + a2 * (2.0 * w).cos()
            }
            WindowFunction::BlackmanHarris => {
                BLACKMAN_HARRIS[0] - BLACKMAN_HARRIS[1] * w.cos()
                    + BLACKMAN_HARRIS[2] * (2.0 * w).cos()
                    - BLACKMAN_HARRIS[3] * (3.0 * w).cos()
            }
        };
        *sample = value as f32;
    }

    // a0 = 0.42 is not exactly representable, which leaves a tiny negative
    // first sample instead of zero.
    if function == WindowFunction::Blackman {
        if let Some(first) = window.first_mut() {
            *first = 0.0;
        }
    }
}

/// How the synthesis window is derived from the analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisPolicy {
    /// Power complementary: synthesis equals analysis.
    SameAsAnalysis,
    /// Both windows are the square root of the analysis shape.
    SquareRoot,
    /// Analysis keeps the sign, synthesis is the plain magnitude root.
    SignedSquareRoot,
    /// Synthesis is `Hann / analysis`.
    HannRatio,
}

/// Picks the synthesis strategy for a window/overlap/presum combination.
///
/// The thresholds for Blackman and Blackman-Harris are empirical and are
/// covered by the COLA ripple tests below.
pub fn synthesis_policy(
    function: WindowFunction,
    overlap_factor: u8,
    window_size_factor: u8,
) -> SynthesisPolicy {
    match function {
        WindowFunction::Hann => {
            if overlap_factor <= 2 {
                SynthesisPolicy::SquareRoot
            } else {
                SynthesisPolicy::SameAsAnalysis
            }
        }
        WindowFunction::Blackman | WindowFunction::BlackmanHarris => {
            if overlap_factor > 3 || (overlap_factor > 2 && window_size_factor >= 4) {
                SynthesisPolicy::SameAsAnalysis
            } else {
                SynthesisPolicy::HannRatio
            }
        }
        WindowFunction::FlatTop => SynthesisPolicy::SignedSquareRoot,
        WindowFunction::Rectangle if overlap_factor == 1 => SynthesisPolicy::SameAsAnalysis,
        _ => SynthesisPolicy::HannRatio,
    }
}

/// Overlap-add gain of a window pair and its relative variation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WolaMetrics {
    pub gain: f32,
    pub ripple: f32,
}

impl Default for WolaMetrics {
    fn default() -> Self {
        Self {
            gain: 1.0,
            ripple: 0.0,
        }
    }
}

/// Computes the analysis and synthesis windows in place and measures the
/// resulting WOLA gain.
///
/// `analysis`, `synthesis` and `scratch` must all be `fft_size *
/// window_size_factor` long.
pub fn calculate_wola_windows(
    function: WindowFunction,
    fft_size: usize,
    overlap_factor: u8,
    window_size_factor: u8,
    analysis: &mut [f32],
    synthesis: &mut [f32],
    scratch: &mut [f32],
) -> WolaMetrics {
    let window_size = analysis.len();
    debug_assert_eq!(window_size, fft_size * window_size_factor as usize);
    debug_assert_eq!(synthesis.len(), window_size);
    debug_assert!(scratch.len() >= window_size);
    let step_size = fft_size / overlap_factor as usize;

    calculate_window(analysis, function);

    match synthesis_policy(function, overlap_factor, window_size_factor) {
        SynthesisPolicy::SameAsAnalysis => synthesis.copy_from_slice(analysis),
        SynthesisPolicy::SquareRoot => {
            for a in analysis.iter_mut() {
                *a = a.sqrt();
            }
            synthesis.copy_from_slice(analysis);
        }
        SynthesisPolicy::SignedSquareRoot => {
            for (a, s) in analysis.iter_mut().zip(synthesis.iter_mut()) {
                let root = a.abs().sqrt();
                *a = root.copysign(*a);
                *s = root;
            }
        }
        SynthesisPolicy::HannRatio => {
            calculate_window(synthesis, WindowFunction::Hann);
            debug_assert!(synthesis.last().map_or(false, |s| *s != 0.0));
            // A zero leading analysis sample keeps the reference value.
            let skip = usize::from(analysis.first() == Some(&0.0));
            for (s, a) in synthesis[skip..].iter_mut().zip(&analysis[skip..]) {
                *s /= *a;
            }
        }
    }

    if window_size_factor > 1 {
        let half = window_size / 2;
        sinc_taper(analysis, half, fft_size);
        sinc_taper(synthesis, half, step_size);
    }

    measure_wola_gain(analysis, synthesis, step_size, &mut scratch[..window_size])
}

/// Multiplies the window symmetrically around its centre by `sin(x)/x`.
fn sinc_taper(window: &mut [f32], half: usize, period: usize) {
    let scale = PI / period as f64;
    for i in 1..half {
        let x = i as f64 * scale;
        let sinc = (x.sin() / x) as f32;
        window[half + i] *= sinc;
        window[half - i] *= sinc;
    }
}

/// Overlap-adds the window product at the hop size and measures the steady
/// state over the last hop of the buffer.
///
/// The mean is used as the gain so non-COLA combinations still get a
/// sensible normalisation.
pub fn measure_wola_gain(
    analysis: &[f32],
    synthesis: &[f32],
    step_size: usize,
    buffer: &mut [f32],
) -> WolaMetrics {
    let window_size = buffer.len();
    buffer.fill(0.0);

    let mut position = 0;
    loop {
        let space_left = window_size - position;
        let count = window_size.min(space_left);
        for ((out, a), s) in buffer[position..position + count]
            .iter_mut()
            .zip(analysis)
            .zip(synthesis)
        {
            *out += a * s;
        }
        if space_left <= step_size {
            break;
        }
        position += step_size;
    }

    let mut minimum = f32::MAX;
    let mut maximum = 0.0f32;
    let mut mean = 0.0f32;
    for &value in &buffer[window_size - step_size..] {
        mean += value.abs();
        minimum = minimum.min(value);
        maximum = maximum.max(value);
    }
    mean /= step_size as f32;

    WolaMetrics {
        gain: mean,
        ripple: (maximum - minimum) / maximum / mean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(function: WindowFunction, fft: usize, overlap: u8, presum: u8) -> WolaMetrics {
        let size = fft * presum as usize;
        let mut analysis = vec![0.0; size];
        let mut synthesis = vec![0.0; size];
        let mut scratch = vec![0.0; size];
        calculate_wola_windows(
            function,
            fft,
            overlap,
            presum,
            &mut analysis,
            &mut synthesis,
            &mut scratch,
        )
    }

    #[test]
    fn test_hann_is_dft_even() {
        let mut w = vec![0.0; 16];
        calculate_window(&mut w, WindowFunction::Hann);
        assert_eq!(w[0], 0.0);
        assert!((w[8] - 1.0).abs() < 1e-6);
        assert!((w[15] - w[1]).abs() < 1e-6);
    }

    #[test]
    fn test_blackman_first_sample_is_zero() {
        let mut w = vec![1.0; 64];
        calculate_window(&mut w, WindowFunction::Blackman);
        assert_eq!(w[0], 0.0);
        assert!(w.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_triangle_peak_and_edges() {
        let mut w = vec![0.0; 8];
        calculate_window(&mut w, WindowFunction::Triangle);
        assert_eq!(w[0], 0.0);
        assert!((w[4] - 1.0).abs() < 1e-6);
        assert!((w[2] - 0.5).abs() < 1e-6);
        assert!((w[6] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rectangle_no_overlap_unity_gain() {
        let m = metrics(WindowFunction::Rectangle, 1024, 1, 1);
        assert_eq!(m.gain, 1.0);
        assert_eq!(m.ripple, 0.0);
    }

    #[test]
    fn test_hann_overlap_four_gain() {
        let m = metrics(WindowFunction::Hann, 2048, 4, 1);
        assert!((m.gain - 1.5).abs() < 1e-4);
        assert!(m.ripple < 1e-5);
    }

    #[test]
    fn test_cola_ripple_grid() {
        // (window, overlap factors, tolerated ripple)
        let grid: &[(WindowFunction, &[u8], f32)] = &[
            (WindowFunction::Hann, &[2, 4, 8, 16], 1e-4),
            (WindowFunction::Hamming, &[2, 4, 8], 1e-4),
            (WindowFunction::Triangle, &[2, 4, 8], 1e-4),
            (WindowFunction::Gaussian, &[2, 4, 8], 1e-4),
            (WindowFunction::Welch, &[2, 4, 8], 1e-4),
            (WindowFunction::Rectangle, &[1, 2, 4, 8], 1e-4),
            (WindowFunction::Blackman, &[2, 8, 16], 1e-3),
            (WindowFunction::BlackmanHarris, &[2, 8, 16], 1e-3),
            (WindowFunction::FlatTop, &[8, 16], 1e-3),
        ];
        for (function, overlaps, epsilon) in grid {
            for &overlap in overlaps.iter() {
                let m = metrics(*function, 1024, overlap, 1);
                assert!(
                    m.ripple < *epsilon,
                    "{} at overlap {}: ripple {}",
                    function.name(),
                    overlap,
                    m.ripple
                );
                assert!(m.gain > 0.0);
            }
        }
    }

    #[test]
    fn test_blackman_power_complementary_thresholds() {
        assert_eq!(
            synthesis_policy(WindowFunction::Blackman, 4, 1),
            SynthesisPolicy::SameAsAnalysis
        );
        assert_eq!(
            synthesis_policy(WindowFunction::BlackmanHarris, 3, 4),
            SynthesisPolicy::SameAsAnalysis
        );
        assert_eq!(
            synthesis_policy(WindowFunction::BlackmanHarris, 3, 2),
            SynthesisPolicy::HannRatio
        );
        // Power complementary Blackman at overlap 4 is usable but not flat.
        let m = metrics(WindowFunction::Blackman, 1024, 4, 1);
        assert!(m.ripple < 0.05);
    }

    #[test]
    fn test_flat_top_keeps_sign_on_analysis_only() {
        let size = 256;
        let mut analysis = vec![0.0; size];
        let mut synthesis = vec![0.0; size];
        let mut scratch = vec![0.0; size];
        calculate_wola_windows(
            WindowFunction::FlatTop,
            size,
            8,
            1,
            &mut analysis,
            &mut synthesis,
            &mut scratch,
        );
        assert!(analysis.iter().any(|a| *a < 0.0));
        assert!(synthesis.iter().all(|s| *s >= 0.0));
    }

    #[test]
    fn test_presum_hann_ripple() {
        // (presum, overlap, tolerated ripple)
        let grid = [(2u8, 4u8, 1e-3f32), (4, 4, 1e-4), (2, 8, 1e-4), (8, 4, 1e-4)];
        for (presum, overlap, epsilon) in grid {
            let m = metrics(WindowFunction::Hann, 1024, overlap, presum);
            assert!(
                m.ripple < epsilon,
                "presum {} overlap {}: ripple {}",
                presum,
                overlap,
                m.ripple
            );
            assert!((m.gain - 1.0).abs() < 1e-2);
        }
    }

    #[test]
    fn test_presum_windows_are_finite() {
        for function in WindowFunction::ALL {
            for presum in [2u8, 4, 8] {
                let m = metrics(function, 256, 4, presum);
                assert!(m.gain.is_finite() && m.gain > 0.0, "{}", function.name());
            }
        }
    }
}
