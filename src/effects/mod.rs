//! Built-in spectral effects.
//!
//! # Effects
//! - [`gate::Gate`]: spectral noise gate.
//! - [`freeze::Freeze`]: holds the amplitude spectrum.
//! - [`robotize::Robotize`]: discards phase.

pub mod freeze;
pub mod gate;
pub mod robotize;

use crate::engine::error::EngineResult;
use crate::engine::factory::ModuleFactory;
use crate::engine::module::Effect;

// Stable effect-type ids. Presets refer to effects by these.
pub const GATE: u8 = 0;
pub const FREEZE: u8 = 1;
pub const ROBOTIZE: u8 = 2;

fn gate() -> Box<dyn Effect> {
    Box::new(gate::Gate::default())
}

fn freeze() -> Box<dyn Effect> {
    Box::new(freeze::Freeze::default())
}

fn robotize() -> Box<dyn Effect> {
    Box::new(robotize::Robotize)
}

pub fn register_builtin(factory: &mut ModuleFactory) -> EngineResult<()> {
    factory.register(GATE, gate)?;
    factory.register(FREEZE, freeze)?;
    factory.register(ROBOTIZE, robotize)?;
    Ok(())
}

/// A factory holding just the built-in effects.
pub fn builtin_factory() -> ModuleFactory {
    let mut factory = ModuleFactory::new();
    let registered = register_builtin(&mut factory);
    debug_assert!(registered.is_ok());
    factory
}

/// Sizes `effect` for an 8-point FFT, then runs one frame of five bins
/// through it and returns the resulting amplitudes and phases.
#[cfg(test)]
pub(crate) fn run_frame(
    effect: &mut dyn Effect,
    parameters: &[f32],
    channel: usize,
    amps: &[f32; 5],
) -> (Vec<f32>, Vec<f32>) {
    assert!(effect.resize(&frame_factors()));
    process_frame(effect, parameters, channel, amps)
}

#[cfg(test)]
fn frame_factors() -> crate::engine::storage::StorageFactors {
    crate::engine::storage::StorageFactors {
        fft_size: 8,
        window_size_factor: 1,
        overlap_factor: 2,
        number_of_channels: 2,
        sample_rate: 48_000,
    }
}

/// Like [`run_frame`] but leaves the effect at whatever size it has.
#[cfg(test)]
pub(crate) fn process_frame(
    effect: &mut dyn Effect,
    parameters: &[f32],
    channel: usize,
    amps: &[f32; 5],
) -> (Vec<f32>, Vec<f32>) {
    use crate::engine::channel_data::{ChannelData, SpectrumBuffers};
    use crate::engine::module::ModuleContext;
    use crate::engine::parameters::{AtomicF32, EffectParameters};
    use crate::engine::setup::Setup;
    use crate::engine::window::{WindowFunction, WolaMetrics};

    let setup = Setup::from_factors(
        &frame_factors(),
        WindowFunction::Hann,
        0,
        WolaMetrics::default(),
    );
    let values: Vec<AtomicF32> = parameters.iter().map(|v| AtomicF32::new(*v)).collect();
    effect.pre_process(EffectParameters::new(&values), &setup);

    let mut region = vec![0.0f32; 50];
    let mut spectra = SpectrumBuffers::new(&mut region, 5);
    let mut data = ChannelData::new(&mut spectra, false);
    {
        let amph = data.amph_mut();
        amph.amps.copy_from_slice(amps);
        amph.phases.fill(0.5);
    }
    let context = ModuleContext {
        channel,
        working_range: 0..5,
        parameters: EffectParameters::new(&values),
        setup: &setup,
    };
    effect.process(&context, &mut data);
    let amph = data.amph();
    (amph.amps.to_vec(), amph.phases.to_vec())
}
