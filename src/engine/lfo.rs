//! Tempo-synced LFOs driving module parameters.
//!
//! The [`LfoTimer`] is advanced once per `process()` call and measures time
//! in bars. Every [`Lfo`] maps the timer position to a normalised value in
//! its `[lower, upper]` bounds; the module then maps that into the driven
//! parameter's range.

use crate::engine::constants::{
    DEFAULT_BAR_DURATION_SECS, DEFAULT_MEASURE_NUMERATOR, MAX_LFO_PERIOD_BARS,
    MIN_LFO_PERIOD_BARS,
};
use crate::engine::parameters::AtomicF32;
use serde::{Deserialize, Serialize};
use std::f32::consts::{E, TAU};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LfoTimer {
    position_in_bars: f32,
    previous_position_in_bars: f32,
    bar_duration: f32,
    measure_numerator: u8,
}

impl Default for LfoTimer {
    fn default() -> Self {
        Self {
            position_in_bars: 0.0,
            previous_position_in_bars: 0.0,
            bar_duration: DEFAULT_BAR_DURATION_SECS,
            measure_numerator: DEFAULT_MEASURE_NUMERATOR,
        }
    }
}

impl LfoTimer {
    pub fn position_in_bars(&self) -> f32 {
        self.position_in_bars
    }

    pub fn previous_position_in_bars(&self) -> f32 {
        self.previous_position_in_bars
    }

    pub fn bar_duration(&self) -> f32 {
        self.bar_duration
    }

    pub fn measure_numerator(&self) -> u8 {
        self.measure_numerator
    }

    /// Moves the timer forward by `samples` at `sample_rate`.
    pub fn advance(&mut self, samples: usize, sample_rate: u32) {
        self.previous_position_in_bars = self.position_in_bars;
        if sample_rate == 0 {
            return;
        }
        self.position_in_bars += samples as f32 / sample_rate as f32 / self.bar_duration;
    }

    /// Host transport update. A non-positive bar duration keeps the old tempo.
    pub fn set_position_in_bars(&mut self, bars: f32, bar_duration: f32, measure_numerator: u8) {
        self.previous_position_in_bars = self.position_in_bars;
        self.position_in_bars = bars.max(0.0);
        if bar_duration > 0.0 {
            self.bar_duration = bar_duration;
        }
        if measure_numerator > 0 {
            self.measure_numerator = measure_numerator;
        }
    }

    pub fn reset(&mut self) {
        self.position_in_bars = 0.0;
        self.previous_position_in_bars = 0.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Waveform {
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    ReverseSawtooth,
    Square,
    Exponent,
    Dirac,
    DiracUpsideDown,
}

impl Waveform {
    pub const ALL: [Waveform; 8] = [
        Waveform::Sine,
        Waveform::Triangle,
        Waveform::Sawtooth,
        Waveform::ReverseSawtooth,
        Waveform::Square,
        Waveform::Exponent,
        Waveform::Dirac,
        Waveform::DiracUpsideDown,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Amplitude in `[0, 1]` at `position` in `[0, 1)` of the period.
    fn amplitude(self, position: f32, new_period: bool) -> f32 {
        match self {
            Waveform::Sine => 0.5 - 0.5 * (TAU * position).cos(),
            Waveform::Triangle => {
                if position < 0.5 {
                    position * 2.0
                } else {
                    1.0 - (position - 0.5) * 2.0
                }
            }
            Waveform::Sawtooth => position,
            Waveform::ReverseSawtooth => 1.0 - position,
            Waveform::Square => {
                if position > 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            Waveform::Exponent => {
                let exponent = if position < 0.5 {
                    position * 2.0
                } else {
                    (1.0 - position) * 2.0
                };
                ((exponent.exp() - 1.0) / (E - 1.0)).min(1.0)
            }
            Waveform::Dirac => {
                if new_period {
                    1.0
                } else {
                    0.0
                }
            }
            Waveform::DiracUpsideDown => {
                if new_period {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }
}

/// LFO settings, editable from the control thread while the audio thread
/// reads them.
#[derive(Debug)]
pub struct Lfo {
    enabled: AtomicBool,
    period_in_bars: AtomicF32,
    phase: AtomicF32,
    lower_bound: AtomicF32,
    upper_bound: AtomicF32,
    waveform: AtomicU8,
}

impl Default for Lfo {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            period_in_bars: AtomicF32::new(1.0),
            phase: AtomicF32::new(0.0),
            lower_bound: AtomicF32::new(0.0),
            upper_bound: AtomicF32::new(1.0),
            waveform: AtomicU8::new(Waveform::Sine as u8),
        }
    }
}

/// Plain copy of an [`Lfo`]'s settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LfoSettings {
    pub enabled: bool,
    pub period_in_bars: f32,
    pub phase: f32,
    pub lower_bound: f32,
    pub upper_bound: f32,
    pub waveform: Waveform,
}

impl Lfo {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn period_in_bars(&self) -> f32 {
        self.period_in_bars.load()
    }

    /// Returns the period actually set after clamping.
    pub fn set_period_in_bars(&self, period: f32) -> f32 {
        let period = period.clamp(MIN_LFO_PERIOD_BARS, MAX_LFO_PERIOD_BARS);
        self.period_in_bars.store(period);
        period
    }

    pub fn phase(&self) -> f32 {
        self.phase.load()
    }

    pub fn set_phase(&self, phase: f32) {
        debug_assert!((-0.5..=0.5).contains(&phase));
        self.phase.store(phase.clamp(-0.5, 0.5));
    }

    pub fn lower_bound(&self) -> f32 {
        self.lower_bound.load()
    }

    pub fn upper_bound(&self) -> f32 {
        self.upper_bound.load()
    }

    /// Moves the upper bound along when it would end up below the lower one.
    /// Returns true if it had to.
    pub fn set_lower_bound(&self, value: f32) -> bool {
        let value = value.clamp(0.0, 1.0);
        self.lower_bound.store(value);
        if self.upper_bound() < value {
            self.upper_bound.store(value);
            return true;
        }
        false
    }

    pub fn set_upper_bound(&self, value: f32) -> bool {
        let value = value.clamp(0.0, 1.0);
        self.upper_bound.store(value);
        if self.lower_bound() > value {
            self.lower_bound.store(value);
            return true;
        }
        false
    }

    pub fn waveform(&self) -> Waveform {
        Waveform::from_index(self.waveform.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set_waveform(&self, waveform: Waveform) {
        self.waveform.store(waveform as u8, Ordering::Relaxed);
    }

    pub fn settings(&self) -> LfoSettings {
        LfoSettings {
            enabled: self.is_enabled(),
            period_in_bars: self.period_in_bars(),
            phase: self.phase(),
            lower_bound: self.lower_bound(),
            upper_bound: self.upper_bound(),
            waveform: self.waveform(),
        }
    }

    pub fn apply(&self, settings: &LfoSettings) {
        self.set_enabled(settings.enabled);
        self.set_period_in_bars(settings.period_in_bars);
        self.phase.store(settings.phase.clamp(-0.5, 0.5));
        self.set_lower_bound(settings.lower_bound);
        self.set_upper_bound(settings.upper_bound);
        self.set_waveform(settings.waveform);
    }

    /// Normalised LFO output for the current timer position, or `None` when
    /// the LFO is off.
    pub fn value(&self, timer: &LfoTimer) -> Option<f32> {
        if !self.is_enabled() {
            return None;
        }
        let period = self.period_in_bars();
        let offset = period * self.phase();
        let current = (offset + timer.position_in_bars()) / period;
        let previous = (offset + timer.previous_position_in_bars()) / period;
        let new_period = current.floor() > previous.floor();
        let position = current.rem_euclid(1.0);

        let amplitude = self.waveform().amplitude(position, new_period);
        let lower = self.lower_bound();
        let upper = self.upper_bound();
        Some(lower + amplitude * (upper - lower))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_advances_in_bars() {
        let mut timer = LfoTimer::default();
        timer.advance(44_100, 44_100);
        assert!((timer.position_in_bars() - 0.5).abs() < 1e-6);
        timer.advance(44_100, 44_100);
        assert!((timer.position_in_bars() - 1.0).abs() < 1e-6);
        assert!((timer.previous_position_in_bars() - 0.5).abs() < 1e-6);
        timer.reset();
        assert_eq!(timer.position_in_bars(), 0.0);
    }

    #[test]
    fn test_host_tempo_override() {
        let mut timer = LfoTimer::default();
        timer.set_position_in_bars(3.0, 1.0, 3);
        assert_eq!(timer.bar_duration(), 1.0);
        assert_eq!(timer.measure_numerator(), 3);
        timer.advance(48_000, 48_000);
        assert!((timer.position_in_bars() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_disabled_lfo_yields_nothing() {
        let lfo = Lfo::default();
        assert_eq!(lfo.value(&LfoTimer::default()), None);
    }

    #[test]
    fn test_sine_spans_bounds() {
        let lfo = Lfo::default();
        lfo.set_enabled(true);
        lfo.set_lower_bound(0.2);
        lfo.set_upper_bound(0.6);
        let mut timer = LfoTimer::default();
        assert!((lfo.value(&timer).unwrap() - 0.2).abs() < 1e-6);
        timer.set_position_in_bars(0.5, 2.0, 4);
        assert!((lfo.value(&timer).unwrap() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_phase_offset_shifts_waveform() {
        let lfo = Lfo::default();
        lfo.set_enabled(true);
        lfo.set_waveform(Waveform::Sawtooth);
        lfo.set_phase(0.25);
        let timer = LfoTimer::default();
        assert!((lfo.value(&timer).unwrap() - 0.25).abs() < 1e-6);
        lfo.set_phase(-0.25);
        assert!((lfo.value(&timer).unwrap() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_bounds_push_each_other() {
        let lfo = Lfo::default();
        assert!(!lfo.set_upper_bound(0.5));
        assert!(lfo.set_lower_bound(0.7));
        assert_eq!(lfo.upper_bound(), 0.7);
        assert!(lfo.set_upper_bound(0.1));
        assert_eq!(lfo.lower_bound(), 0.1);
    }

    #[test]
    fn test_dirac_fires_on_period_boundary() {
        let lfo = Lfo::default();
        lfo.set_enabled(true);
        lfo.set_waveform(Waveform::Dirac);
        let mut timer = LfoTimer::default();
        timer.set_position_in_bars(0.9, 2.0, 4);
        assert_eq!(lfo.value(&timer), Some(0.0));
        timer.set_position_in_bars(1.1, 2.0, 4);
        assert_eq!(lfo.value(&timer), Some(1.0));
    }

    #[test]
    fn test_waveforms_stay_normalised() {
        for waveform in Waveform::ALL {
            for i in 0..100 {
                let value = waveform.amplitude(i as f32 / 100.0, i == 0);
                assert!((0.0..=1.0).contains(&value), "{:?} at {}", waveform, i);
            }
        }
    }

    #[test]
    fn test_period_is_clamped() {
        let lfo = Lfo::default();
        assert_eq!(lfo.set_period_in_bars(1000.0), MAX_LFO_PERIOD_BARS);
        assert_eq!(lfo.set_period_in_bars(0.0), MIN_LFO_PERIOD_BARS);
    }
}
