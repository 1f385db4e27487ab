//! Parameter metadata and lock-free parameter storage.
//!
//! Values are shared between the control thread (user edits, automation,
//! preset loading) and the audio thread, so they are stored as atomic `f32`
//! bit patterns.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// `f32` stored as its bit pattern in an `AtomicU32`.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    Trigger,
    Boolean,
    Enumerated,
    Integer,
    Float,
}

/// Everything a generic preset layer needs to know about one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterInfo {
    pub name: &'static str,
    pub unit: &'static str,
    pub kind: ParameterKind,
    pub minimum: f32,
    pub maximum: f32,
    pub default: f32,
}

impl ParameterInfo {
    pub const fn float(
        name: &'static str,
        unit: &'static str,
        minimum: f32,
        maximum: f32,
        default: f32,
    ) -> Self {
        Self {
            name,
            unit,
            kind: ParameterKind::Float,
            minimum,
            maximum,
            default,
        }
    }

    pub const fn boolean(name: &'static str, default: bool) -> Self {
        Self {
            name,
            unit: "",
            kind: ParameterKind::Boolean,
            minimum: 0.0,
            maximum: 1.0,
            default: if default { 1.0 } else { 0.0 },
        }
    }

    pub const fn enumerated(name: &'static str, count: u8, default: u8) -> Self {
        Self {
            name,
            unit: "",
            kind: ParameterKind::Enumerated,
            minimum: 0.0,
            maximum: (count - 1) as f32,
            default: default as f32,
        }
    }

    /// Clamps and, for discrete kinds, rounds to a legal value.
    pub fn sanitise(&self, value: f32) -> f32 {
        let value = value.clamp(self.minimum, self.maximum);
        match self.kind {
            ParameterKind::Float => value,
            _ => value.round(),
        }
    }

    pub fn is_in_range(&self, value: f32) -> bool {
        value >= self.minimum && value <= self.maximum
    }

    pub fn normalised_to_value(&self, normalised: f32) -> f32 {
        self.sanitise(self.minimum + normalised * (self.maximum - self.minimum))
    }

    pub fn value_to_normalised(&self, value: f32) -> f32 {
        let span = self.maximum - self.minimum;
        if span == 0.0 {
            0.0
        } else {
            (value - self.minimum) / span
        }
    }
}

/// Parameters every module has, in front of its effect-specific ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum BaseParameter {
    Bypass,
    Gain,
    Wet,
    StartFrequency,
    StopFrequency,
}

pub const NUMBER_OF_BASE_PARAMETERS: usize = 5;

pub static BASE_PARAMETERS: [ParameterInfo; NUMBER_OF_BASE_PARAMETERS] = [
    ParameterInfo::boolean("Bypass", false),
    ParameterInfo::float("Gain", "dB", -20.0, 20.0, 0.0),
    ParameterInfo::float("Wet", "%", 0.0, 100.0, 100.0),
    ParameterInfo::float("Start frequency", "", 0.0, 1.0, 0.0),
    ParameterInfo::float("Stop frequency", "", 0.0, 1.0, 1.0),
];

/// Effect-specific parameter values as seen by an effect.
#[derive(Clone, Copy)]
pub struct EffectParameters<'a> {
    values: &'a [AtomicF32],
}

impl<'a> EffectParameters<'a> {
    pub(crate) fn new(values: &'a [AtomicF32]) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> f32 {
        self.values.get(index).map_or(0.0, AtomicF32::load)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
