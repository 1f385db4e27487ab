//! Spectral gate: bins quieter than the threshold are silenced.

use crate::engine::channel_data::ChannelData;
use crate::engine::module::{db_to_gain, Effect, EffectInfo, ModuleContext};
use crate::engine::parameters::{EffectParameters, ParameterInfo};
use crate::engine::setup::Setup;

static INFO: EffectInfo = EffectInfo {
    name: "Gate",
    parameters: &[ParameterInfo::float("Threshold", "dB", -120.0, 0.0, -60.0)],
};

#[derive(Default)]
pub struct Gate {
    // Linear amplitude threshold in FFT units.
    threshold: f32,
}

impl Effect for Gate {
    fn info(&self) -> &'static EffectInfo {
        &INFO
    }

    fn pre_process(&mut self, parameters: EffectParameters<'_>, setup: &Setup) {
        // A full-scale sine peaks at N/2 in its bin.
        let full_scale = setup.fft_size() as f32 / 2.0;
        self.threshold = db_to_gain(parameters.get(0)) * full_scale;
    }

    fn process(&mut self, context: &ModuleContext<'_>, data: &mut ChannelData<'_>) {
        let amph = data.amph_mut();
        for amp in &mut amph.amps[context.working_range.clone()] {
            if *amp < self.threshold {
                *amp = 0.0;
            }
        }
    }
}
