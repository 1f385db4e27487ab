//! Spectral modules: the [`Effect`] trait and the [`ModuleNode`] wrapper that
//! the chain holds.
//!
//! # Parameters
//! A module exposes one flat parameter index space. The five base
//! parameters come first (see [`BaseParameter`]), followed by the effect's
//! own. Every parameter except Bypass can be driven by an LFO.
//!
//! # Threading
//! Parameter values and LFO settings are atomics. The effect itself sits
//! behind a mutex: the control thread locks it to resize or reset, the audio
//! thread only `try_lock`s it and skips the module for that frame when it is
//! busy.

use crate::engine::channel_data::ChannelData;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::lfo::{Lfo, LfoSettings, LfoTimer};
use crate::engine::parameters::{
    AtomicF32, BaseParameter, EffectParameters, ParameterInfo, BASE_PARAMETERS,
    NUMBER_OF_BASE_PARAMETERS,
};
use crate::engine::setup::Setup;
use crate::engine::storage::StorageFactors;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Static description of an effect type.
#[derive(Debug)]
pub struct EffectInfo {
    pub name: &'static str,
    pub parameters: &'static [ParameterInfo],
}

/// What a module sees while processing one channel of one frame.
pub struct ModuleContext<'a> {
    pub channel: usize,
    /// Bins between the module's start and stop frequency.
    pub working_range: Range<usize>,
    pub parameters: EffectParameters<'a>,
    pub setup: &'a Setup,
}

/// A frequency-domain effect.
///
/// `process` is called once per channel per frame, in channel order, on the
/// audio thread. It must not allocate or block. `resize` runs on the control
/// thread and must be all-or-nothing: on `false` the effect keeps its
/// previous state untouched.
pub trait Effect: Send {
    fn info(&self) -> &'static EffectInfo;

    /// Once per `process()` call, before any frame is transformed.
    fn pre_process(&mut self, _parameters: EffectParameters<'_>, _setup: &Setup) {}

    fn process(&mut self, context: &ModuleContext<'_>, data: &mut ChannelData<'_>);

    /// Clears history such as held spectra.
    fn reset(&mut self) {}

    fn resize(&mut self, _factors: &StorageFactors) -> bool {
        true
    }
}

/// Position of a node in its lifecycle. A node is linked into a chain at
/// most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Detached,
    Linked,
    Unlinked,
}

struct ModuleDsp {
    effect: Box<dyn Effect>,
    working_range: Range<usize>,
    factors: StorageFactors,
}

pub struct ModuleNode {
    effect_type: u8,
    info: &'static EffectInfo,
    base: [AtomicF32; NUMBER_OF_BASE_PARAMETERS],
    effect_parameters: Box<[AtomicF32]>,
    // One per parameter except Bypass.
    lfos: Box<[Lfo]>,
    link: AtomicU8,
    dsp: Mutex<ModuleDsp>,
}

/// Serializable state of one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSnapshot {
    pub effect_type: u8,
    pub parameters: Vec<f32>,
    #[serde(default)]
    pub lfos: Vec<LfoSettings>,
}

impl ModuleNode {
    pub fn new(effect_type: u8, effect: Box<dyn Effect>) -> Self {
        let info = effect.info();
        let base = BASE_PARAMETERS.map(|p| AtomicF32::new(p.default));
        let effect_parameters = info
            .parameters
            .iter()
            .map(|p| AtomicF32::new(p.default))
            .collect();
        let lfos = (1..NUMBER_OF_BASE_PARAMETERS + info.parameters.len())
            .map(|_| Lfo::default())
            .collect();
        Self {
            effect_type,
            info,
            base,
            effect_parameters,
            lfos,
            link: AtomicU8::new(LinkState::Detached as u8),
            dsp: Mutex::new(ModuleDsp {
                effect,
                working_range: 0..0,
                factors: StorageFactors::default(),
            }),
        }
    }

    pub fn effect_type(&self) -> u8 {
        self.effect_type
    }

    pub fn name(&self) -> &'static str {
        self.info.name
    }

    pub fn link_state(&self) -> LinkState {
        match self.link.load(Ordering::Acquire) {
            0 => LinkState::Detached,
            1 => LinkState::Linked,
            _ => LinkState::Unlinked,
        }
    }

    pub(crate) fn mark_linked(&self) -> EngineResult<()> {
        self.link
            .compare_exchange(
                LinkState::Detached as u8,
                LinkState::Linked as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| EngineError::ModuleAlreadyLinked)
    }

    pub(crate) fn mark_unlinked(&self) {
        self.link.store(LinkState::Unlinked as u8, Ordering::Release);
    }

    fn lock_dsp(&self) -> MutexGuard<'_, ModuleDsp> {
        self.dsp.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Parameters

    pub fn number_of_parameters(&self) -> usize {
        NUMBER_OF_BASE_PARAMETERS + self.effect_parameters.len()
    }

    fn slot(&self, index: usize) -> Option<&AtomicF32> {
        if index < NUMBER_OF_BASE_PARAMETERS {
            self.base.get(index)
        } else {
            self.effect_parameters.get(index - NUMBER_OF_BASE_PARAMETERS)
        }
    }

    pub fn parameter_info(&self, index: usize) -> Option<ParameterInfo> {
        if index < NUMBER_OF_BASE_PARAMETERS {
            BASE_PARAMETERS.get(index).copied()
        } else {
            self.info
                .parameters
                .get(index - NUMBER_OF_BASE_PARAMETERS)
                .copied()
        }
    }

    pub fn parameter(&self, index: usize) -> Option<f32> {
        self.slot(index).map(AtomicF32::load)
    }

    /// Stores `value` clamped into the parameter's range and returns what was
    /// stored.
    pub fn set_parameter(&self, index: usize, value: f32) -> EngineResult<f32> {
        let (slot, info) = self
            .slot(index)
            .zip(self.parameter_info(index))
            .ok_or(EngineError::ParameterOutOfRange(index))?;
        let value = info.sanitise(value);
        slot.store(value);
        Ok(value)
    }

    pub fn base_parameter(&self, parameter: BaseParameter) -> f32 {
        self.base[parameter as usize].load()
    }

    pub fn set_base_parameter(&self, parameter: BaseParameter, value: f32) -> f32 {
        let value = BASE_PARAMETERS[parameter as usize].sanitise(value);
        self.base[parameter as usize].store(value);
        value
    }

    pub fn is_bypassed(&self) -> bool {
        self.base_parameter(BaseParameter::Bypass) >= 0.5
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.set_base_parameter(BaseParameter::Bypass, if bypass { 1.0 } else { 0.0 });
    }

    /// The LFO driving parameter `index`. Bypass has none.
    pub fn lfo(&self, index: usize) -> Option<&Lfo> {
        index.checked_sub(1).and_then(|i| self.lfos.get(i))
    }

    pub fn snapshot(&self) -> ModuleSnapshot {
        ModuleSnapshot {
            effect_type: self.effect_type,
            parameters: (0..self.number_of_parameters())
                .filter_map(|i| self.parameter(i))
                .collect(),
            lfos: self.lfos.iter().map(Lfo::settings).collect(),
        }
    }

    pub fn restore(&self, snapshot: &ModuleSnapshot) -> EngineResult<()> {
        if snapshot.effect_type != self.effect_type
            || snapshot.parameters.len() != self.number_of_parameters()
            || snapshot.lfos.len() > self.lfos.len()
        {
            return Err(EngineError::InvalidSnapshot(snapshot.effect_type));
        }
        for (index, value) in snapshot.parameters.iter().enumerate() {
            self.set_parameter(index, *value)?;
        }
        for (lfo, settings) in self.lfos.iter().zip(&snapshot.lfos) {
            lfo.apply(settings);
        }
        Ok(())
    }

    // Processing

    /// Factors the effect last accepted.
    pub fn factors(&self) -> StorageFactors {
        self.lock_dsp().factors
    }

    /// Applies LFOs, updates the working range and lets the effect prepare
    /// for the coming frames. Skipped entirely while bypassed.
    pub fn pre_process(&self, timer: &LfoTimer, setup: &Setup) {
        if self.is_bypassed() {
            return;
        }
        for (offset, lfo) in self.lfos.iter().enumerate() {
            let index = offset + 1;
            if let (Some(value), Some(info), Some(slot)) =
                (lfo.value(timer), self.parameter_info(index), self.slot(index))
            {
                slot.store(info.normalised_to_value(value));
            }
        }

        let Ok(mut dsp) = self.dsp.try_lock() else {
            return;
        };
        let start = setup.normalised_frequency_to_bin(
            self.base_parameter(BaseParameter::StartFrequency),
        );
        let stop =
            setup.normalised_frequency_to_bin(self.base_parameter(BaseParameter::StopFrequency));
        dsp.working_range = if stop >= start {
            start..stop + 1
        } else {
            start..start
        };
        dsp.effect
            .pre_process(EffectParameters::new(&self.effect_parameters), setup);
    }

    /// Runs the effect on one channel's frame, then applies wet/dry and gain.
    pub fn process(&self, channel: usize, data: &mut ChannelData<'_>, setup: &Setup) {
        if self.is_bypassed() {
            return;
        }
        let Ok(mut dsp) = self.dsp.try_lock() else {
            return;
        };
        let wet = self.base_parameter(BaseParameter::Wet) / 100.0;
        let gain_db = self.base_parameter(BaseParameter::Gain);

        if wet < 1.0 {
            data.save_for_blending();
        }
        let context = ModuleContext {
            channel,
            working_range: dsp.working_range.clone(),
            parameters: EffectParameters::new(&self.effect_parameters),
            setup,
        };
        dsp.effect.process(&context, data);
        if wet < 1.0 {
            data.blend_with_saved(wet);
        }
        if gain_db != 0.0 {
            data.amplify(db_to_gain(gain_db));
        }
    }

    pub fn reset(&self) {
        self.lock_dsp().effect.reset();
    }

    /// Offers new factors to the effect. On rejection nothing changes.
    pub fn resize(&self, factors: &StorageFactors) -> bool {
        let mut dsp = self.lock_dsp();
        if !dsp.effect.resize(factors) {
            return false;
        }
        dsp.factors = *factors;
        true
    }
}

pub fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::channel_data::SpectrumBuffers;
    use crate::engine::window::{WindowFunction, WolaMetrics};

    static SCALE_INFO: EffectInfo = EffectInfo {
        name: "Scale",
        parameters: &[ParameterInfo::float("Factor", "", 0.0, 4.0, 2.0)],
    };

    struct Scale;

    impl Effect for Scale {
        fn info(&self) -> &'static EffectInfo {
            &SCALE_INFO
        }

        fn process(&mut self, context: &ModuleContext<'_>, data: &mut ChannelData<'_>) {
            let factor = context.parameters.get(0);
            let reim = data.reim_mut();
            for bin in context.working_range.clone() {
                reim.reals[bin] *= factor;
            }
        }
    }

    fn setup() -> Setup {
        let factors = StorageFactors {
            fft_size: 8,
            window_size_factor: 1,
            overlap_factor: 2,
            number_of_channels: 1,
            sample_rate: 48_000,
        };
        Setup::from_factors(&factors, WindowFunction::Hann, 0, WolaMetrics::default())
    }

    fn run(node: &ModuleNode, reals: &[f32; 5]) -> Vec<f32> {
        let setup = setup();
        node.pre_process(&LfoTimer::default(), &setup);
        let mut region = vec![0.0f32; 50];
        let mut spectra = SpectrumBuffers::new(&mut region, 5);
        let mut data = ChannelData::new(&mut spectra, false);
        data.reim_mut().reals.copy_from_slice(reals);
        node.process(0, &mut data, &setup);
        data.reim().reals.to_vec()
    }

    #[test]
    fn test_flat_parameter_index() {
        let node = ModuleNode::new(7, Box::new(Scale));
        assert_eq!(node.number_of_parameters(), 6);
        assert_eq!(node.parameter(2), Some(100.0));
        assert_eq!(node.parameter(5), Some(2.0));
        assert_eq!(node.parameter_info(5).map(|p| p.name), Some("Factor"));
        assert_eq!(node.parameter(6), None);
        assert_eq!(
            node.set_parameter(6, 1.0),
            Err(EngineError::ParameterOutOfRange(6))
        );
        assert_eq!(node.set_parameter(5, 9.0), Ok(4.0));
    }

    #[test]
    fn test_process_applies_effect_in_working_range() {
        let node = ModuleNode::new(7, Box::new(Scale));
        node.set_parameter(3, 0.5).unwrap();
        let out = run(&node, &[1.0; 5]);
        assert_eq!(out, vec![1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_wet_and_gain() {
        let node = ModuleNode::new(7, Box::new(Scale));
        node.set_base_parameter(BaseParameter::Wet, 50.0);
        let out = run(&node, &[1.0; 5]);
        assert!(out.iter().all(|v| (v - 1.5).abs() < 1e-6));

        node.set_base_parameter(BaseParameter::Wet, 100.0);
        node.set_base_parameter(BaseParameter::Gain, -20.0);
        let out = run(&node, &[1.0; 5]);
        assert!(out.iter().all(|v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_bypass_leaves_data_alone() {
        let node = ModuleNode::new(7, Box::new(Scale));
        node.set_bypass(true);
        assert_eq!(run(&node, &[1.0; 5]), vec![1.0; 5]);
    }

    #[test]
    fn test_lfo_drives_parameter() {
        let node = ModuleNode::new(7, Box::new(Scale));
        let lfo = node.lfo(5).unwrap();
        lfo.set_enabled(true);
        lfo.set_lower_bound(0.25);
        lfo.set_upper_bound(0.25);
        node.pre_process(&LfoTimer::default(), &setup());
        assert_eq!(node.parameter(5), Some(1.0));
        assert!(node.lfo(0).is_none());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let node = ModuleNode::new(7, Box::new(Scale));
        node.set_parameter(1, -6.0).unwrap();
        node.set_parameter(5, 3.0).unwrap();
        node.lfo(1).unwrap().set_enabled(true);
        let json = serde_json::to_string(&node.snapshot()).unwrap();

        let other = ModuleNode::new(7, Box::new(Scale));
        let snapshot: ModuleSnapshot = serde_json::from_str(&json).unwrap();
        other.restore(&snapshot).unwrap();
        assert_eq!(other.parameter(1), Some(-6.0));
        assert_eq!(other.parameter(5), Some(3.0));
        assert!(other.lfo(1).unwrap().is_enabled());

        let wrong = ModuleSnapshot {
            effect_type: 3,
            ..snapshot
        };
        assert_eq!(other.restore(&wrong), Err(EngineError::InvalidSnapshot(3)));
    }

    #[test]
    fn test_link_state_is_one_way() {
        let node = ModuleNode::new(7, Box::new(Scale));
        assert_eq!(node.link_state(), LinkState::Detached);
        node.mark_linked().unwrap();
        assert_eq!(node.link_state(), LinkState::Linked);
        node.mark_unlinked();
        assert_eq!(node.mark_linked(), Err(EngineError::ModuleAlreadyLinked));
    }
}
