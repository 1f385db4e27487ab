//! Zeroes every phase in the working range, which turns voices into a
//! monotone buzz at the hop rate.

use crate::engine::channel_data::ChannelData;
use crate::engine::module::{Effect, EffectInfo, ModuleContext};

static INFO: EffectInfo = EffectInfo {
    name: "Robotize",
    parameters: &[],
};

pub struct Robotize;

impl Effect for Robotize {
    fn info(&self) -> &'static EffectInfo {
        &INFO
    }

    fn process(&mut self, context: &ModuleContext<'_>, data: &mut ChannelData<'_>) {
        data.amph_mut().phases[context.working_range.clone()].fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::run_frame;

    #[test]
    fn test_phases_are_zeroed() {
        let (amps, phases) = run_frame(&mut Robotize, &[], 0, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(amps, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(phases, vec![0.0; 5]);
    }
}
