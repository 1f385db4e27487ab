//! Spectral freeze: while engaged, every channel keeps repeating the
//! amplitude spectrum it had when the freeze started. Phases keep moving.

use crate::engine::channel_data::ChannelData;
use crate::engine::module::{Effect, EffectInfo, ModuleContext};
use crate::engine::parameters::ParameterInfo;
use crate::engine::storage::StorageFactors;

static INFO: EffectInfo = EffectInfo {
    name: "Freeze",
    parameters: &[ParameterInfo::boolean("Freeze", false)],
};

#[derive(Default)]
pub struct Freeze {
    bins: usize,
    // channels * bins held amplitudes
    held: Vec<f32>,
    captured: Vec<bool>,
}

impl Effect for Freeze {
    fn info(&self) -> &'static EffectInfo {
        &INFO
    }

    fn process(&mut self, context: &ModuleContext<'_>, data: &mut ChannelData<'_>) {
        // Sized for another configuration; wait for the next resize.
        if data.number_of_bins() != self.bins {
            return;
        }
        let channel = context.channel;
        let Some(captured) = self.captured.get_mut(channel) else {
            return;
        };
        if context.parameters.get(0) < 0.5 {
            *captured = false;
            return;
        }

        let held = &mut self.held[channel * self.bins..(channel + 1) * self.bins];
        let amph = data.amph_mut();
        if *captured {
            let range = context.working_range.clone();
            amph.amps[range.clone()].copy_from_slice(&held[range]);
        } else {
            held.copy_from_slice(&amph.amps[..self.bins]);
            *captured = true;
        }
    }

    fn reset(&mut self) {
        self.held.fill(0.0);
        self.captured.fill(false);
    }

    fn resize(&mut self, factors: &StorageFactors) -> bool {
        let channels = factors.number_of_channels as usize;
        let bins = if factors.fft_size == 0 {
            0
        } else {
            factors.number_of_bins()
        };
        if bins == self.bins && channels == self.captured.len() {
            return true;
        }

        let mut held = Vec::new();
        let mut captured = Vec::new();
        if held.try_reserve_exact(channels * bins).is_err()
            || captured.try_reserve_exact(channels).is_err()
        {
            return false;
        }
        held.resize(channels * bins, 0.0);
        captured.resize(channels, false);

        self.bins = bins;
        self.held = held;
        self.captured = captured;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{process_frame, run_frame};

    #[test]
    fn test_holds_first_frame_per_channel() {
        let mut freeze = Freeze::default();
        let first = [1.0, 2.0, 3.0, 4.0, 5.0];
        let second = [9.0; 5];
        let (amps, _) = run_frame(&mut freeze, &[1.0], 0, &first);
        assert_eq!(amps, first.to_vec());
        let (amps, phases) = run_frame(&mut freeze, &[1.0], 0, &second);
        assert_eq!(amps, first.to_vec());
        assert_eq!(phases, vec![0.5; 5]);

        // channel 1 has its own hold
        let (amps, _) = run_frame(&mut freeze, &[1.0], 1, &second);
        assert_eq!(amps, second.to_vec());
    }

    #[test]
    fn test_release_and_reset() {
        let mut freeze = Freeze::default();
        run_frame(&mut freeze, &[1.0], 0, &[1.0; 5]);
        let (amps, _) = run_frame(&mut freeze, &[0.0], 0, &[2.0; 5]);
        assert_eq!(amps, vec![2.0; 5]);

        run_frame(&mut freeze, &[1.0], 0, &[3.0; 5]);
        freeze.reset();
        let (amps, _) = run_frame(&mut freeze, &[1.0], 0, &[4.0; 5]);
        assert_eq!(amps, vec![4.0; 5]);
    }

    #[test]
    fn test_frame_of_another_size_is_left_alone() {
        let mut freeze = Freeze::default();
        let factors = StorageFactors {
            fft_size: 64,
            window_size_factor: 1,
            overlap_factor: 4,
            number_of_channels: 2,
            sample_rate: 44_100,
        };
        assert!(freeze.resize(&factors));
        let (amps, _) = process_frame(&mut freeze, &[1.0], 0, &[1.0; 5]);
        assert_eq!(amps, vec![1.0; 5]);
        let (amps, _) = process_frame(&mut freeze, &[1.0], 0, &[2.0; 5]);
        assert_eq!(amps, vec![2.0; 5]);
        assert!(!freeze.captured[0]);
    }

    #[test]
    fn test_resize_tracks_dimensions() {
        let mut freeze = Freeze::default();
        let factors = StorageFactors {
            fft_size: 64,
            window_size_factor: 1,
            overlap_factor: 4,
            number_of_channels: 3,
            sample_rate: 44_100,
        };
        assert!(freeze.resize(&factors));
        assert_eq!(freeze.held.len(), 3 * 33);
        assert!(freeze.resize(&StorageFactors::default()));
        assert!(freeze.held.is_empty());
    }
}
