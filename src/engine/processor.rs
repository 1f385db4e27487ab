//! The WOLA engine: owns the shared storage, runs the per-hop pipeline and
//! applies configuration changes.
//!
//! # Pipeline
//! For every channel, new samples are appended to the input FIFO. Whenever
//! the FIFO holds a full window and the output accumulator has room, one
//! frame is analysed, handed to every module in chain order, resynthesised
//! and overlap-added. Ready output is then moved to the host buffer; while
//! none is ready yet the host gets silence.
//!
//! # Locking
//! One mutex guards the whole `process()` call and every change to the
//! storage factors. The module chain is not covered by it: the audio thread
//! reads a lock-free snapshot of the chain.
//!
//! # Configuration changes
//! A change is applied in three stages. Incomplete factors are only
//! recorded. A change that keeps every buffer size (window function, sample
//! rate) is applied in place. Anything else builds new storage first,
//! offers the new factors to every module and only then swaps, so a failure
//! at any point leaves the engine running as before.

use crate::config::EngineConfig;
use crate::effects::builtin_factory;
use crate::engine::channel_buffers::ChannelBuffers;
use crate::engine::constants::DEFAULT_WINDOW_FUNCTION;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::factory::ModuleFactory;
use crate::engine::fft::FftEngine;
use crate::engine::lfo::LfoTimer;
use crate::engine::module::ModuleNode;
use crate::engine::module_chain::{ModuleChain, ModuleHandle};
use crate::engine::setup::Setup;
use crate::engine::storage::{SharedStorage, StorageFactors, StorageLayout, StorageView};
use crate::engine::window::{calculate_wola_windows, WindowFunction};
use no_denormals::no_denormals;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Everything guarded by the processing lock.
pub struct EngineState {
    requested: StorageFactors,
    active: StorageFactors,
    window_function: WindowFunction,
    side_channels: u8,
    setup: Setup,
    storage: SharedStorage,
    fft: Option<FftEngine>,
    lfo_timer: LfoTimer,
    storage_limit: Option<usize>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            requested: StorageFactors::default(),
            active: StorageFactors::default(),
            window_function: DEFAULT_WINDOW_FUNCTION,
            side_channels: 0,
            setup: Setup::default(),
            storage: SharedStorage::default(),
            fft: None,
            lfo_timer: LfoTimer::default(),
            storage_limit: None,
        }
    }
}

/// Per-call values shared by every hop of every channel.
struct HopParameters<'a> {
    modules: &'a [ModuleHandle],
    setup: &'a Setup,
    analysis_window: &'a [f32],
    synthesis_window: &'a [f32],
    scaling: f32,
    dry_scaling: Option<f32>,
}

impl EngineState {
    fn is_allocated(&self) -> bool {
        self.fft.is_some() && self.storage.is_allocated()
    }

    fn storage_size(&self) -> usize {
        self.storage.size_in_bytes() + self.fft.as_ref().map_or(0, FftEngine::heap_bytes)
    }

    /// Recomputes both windows and rebuilds the setup from the active
    /// factors.
    fn update_windows(&mut self) {
        let factors = self.active;
        let view = self.storage.view();
        let wola = calculate_wola_windows(
            self.window_function,
            factors.fft_size as usize,
            factors.overlap_factor,
            factors.window_size_factor,
            view.analysis_window,
            view.synthesis_window,
            view.scratch,
        );
        self.setup = Setup::from_factors(&factors, self.window_function, self.side_channels, wola);
        log::debug!(
            "{} window: WOLA gain {:.4}, ripple {:.6}",
            self.window_function.name(),
            wola.gain,
            wola.ripple
        );
    }

    fn reset_channels(&mut self) {
        let initial_silence = self.setup.latency_in_samples();
        let mut view = self.storage.view();
        for index in 0..view.number_of_channels() {
            view.channel(index).reset(initial_silence);
        }
    }

    fn clear_side_channels(&mut self, from: u8) {
        let mut view = self.storage.view();
        for index in from as usize..view.number_of_channels() {
            view.channel(index).clear_side_channel_data();
        }
    }

    /// The resize protocol.
    fn apply_factors(&mut self, chain: &ModuleChain, new: StorageFactors) -> EngineResult<()> {
        new.validate()?;
        if new.number_of_channels != 0 && self.side_channels > new.number_of_channels {
            return Err(EngineError::InvalidChannelCount {
                main: new.number_of_channels,
                side: self.side_channels,
            });
        }
        if !new.is_complete() {
            log::debug!("deferring allocation, factors incomplete: {:?}", new);
            self.requested = new;
            return Ok(());
        }

        if self.is_allocated() && new == self.active {
            self.requested = new;
            self.update_windows();
            return Ok(());
        }

        if self.is_allocated() && new.same_storage(&self.active) {
            chain.resize_all(&new, &self.active)?;
            self.active = new;
            self.requested = new;
            self.setup.set_sample_rate(new.sample_rate);
            return Ok(());
        }

        let layout = StorageLayout::new(&new);
        let fft = FftEngine::new(new.fft_size as usize)?;
        let required = layout.size_in_bytes() + fft.heap_bytes();
        if let Some(limit) = self.storage_limit {
            if required > limit {
                log::warn!("{:?} needs {} bytes, limit is {}", new, required, limit);
                return Err(EngineError::OutOfMemory {
                    required,
                    available: limit,
                });
            }
        }
        let storage = SharedStorage::allocate(layout)?;
        chain.resize_all(&new, &self.active)?;

        log::debug!("storage resized to {:?} ({} bytes)", new, required);
        self.storage = storage;
        self.fft = Some(fft);
        self.active = new;
        self.requested = new;
        self.update_windows();
        self.reset_channels();
        Ok(())
    }

    fn set_side_channels(&mut self, side: u8) {
        let old = self.side_channels;
        self.side_channels = side;
        self.setup.set_side_channels(side.min(self.setup.number_of_channels()));
        if side < old && self.is_allocated() {
            self.clear_side_channels(side);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process(
        &mut self,
        chain: &ModuleChain,
        main: &[&[f32]],
        side: &[&[f32]],
        outputs: &mut [&mut [f32]],
        number_of_samples: usize,
        output_gain: f32,
        mix_amount: f32,
    ) {
        self.lfo_timer
            .advance(number_of_samples, self.setup.sample_rate());
        chain.pre_process_all(&self.lfo_timer, &self.setup);

        let Some(fft) = self.fft.as_mut() else {
            for output in outputs.iter_mut() {
                output[..number_of_samples].fill(0.0);
            }
            return;
        };
        let modules = chain.snapshot();
        let setup = self.setup;
        let StorageView {
            analysis_window,
            synthesis_window,
            scratch,
            mut channels,
            ..
        } = self.storage.view();
        let parameters = HopParameters {
            modules: &modules,
            setup: &setup,
            analysis_window,
            synthesis_window,
            scaling: output_gain * mix_amount / setup.wola_gain(),
            dry_scaling: (mix_amount < 1.0).then(|| 1.0 - mix_amount),
        };

        let count = channels.len().min(main.len()).min(outputs.len());
        debug_assert_eq!(count, setup.number_of_channels() as usize);
        for index in 0..count {
            let input = &main[index][..number_of_samples];
            let side_input = (index < setup.number_of_side_channels() as usize)
                .then(|| side.get(index).map(|s| &s[..number_of_samples]))
                .flatten();
            let output = &mut outputs[index][..number_of_samples];
            report_invalid("input", index, input);
            process_single_channel(
                &parameters,
                fft,
                scratch,
                &mut channels.channel(index),
                index,
                input,
                side_input,
                output,
            );
            report_invalid("output", index, output);
        }
        for output in outputs.iter_mut().skip(count) {
            output[..number_of_samples].fill(0.0);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_interleaved(
        &mut self,
        chain: &ModuleChain,
        main: &[f32],
        side: &[f32],
        output: &mut [f32],
        number_of_samples: usize,
        output_gain: f32,
        mix_amount: f32,
    ) {
        let channels = self.setup.number_of_channels() as usize;
        let side_channels = self.setup.number_of_side_channels() as usize;
        if !self.is_allocated() || channels == 0 {
            output.fill(0.0);
            self.lfo_timer
                .advance(number_of_samples, self.setup.sample_rate());
            chain.pre_process_all(&self.lfo_timer, &self.setup);
            return;
        }
        if channels == 1 {
            let side_lanes = [side];
            let side: &[&[f32]] = if side_channels == 1 { &side_lanes } else { &[] };
            self.process(
                chain,
                &[main],
                side,
                &mut [output],
                number_of_samples,
                output_gain,
                mix_amount,
            );
            return;
        }

        self.lfo_timer
            .advance(number_of_samples, self.setup.sample_rate());
        chain.pre_process_all(&self.lfo_timer, &self.setup);

        let Some(fft) = self.fft.as_mut() else {
            return;
        };
        let modules = chain.snapshot();
        let setup = self.setup;
        let block_size = setup.fft_size();
        let StorageView {
            analysis_window,
            synthesis_window,
            scratch,
            interleave,
            channels: mut channel_set,
            ..
        } = self.storage.view();
        let parameters = HopParameters {
            modules: &modules,
            setup: &setup,
            analysis_window,
            synthesis_window,
            scaling: output_gain * mix_amount / setup.wola_gain(),
            dry_scaling: (mix_amount < 1.0).then(|| 1.0 - mix_amount),
        };

        let mut done = 0;
        while done < number_of_samples {
            let block = block_size.min(number_of_samples - done);
            for index in 0..channels {
                let lane = index * block_size..index * block_size + block;
                deinterleave(
                    &main[done * channels..],
                    channels,
                    index,
                    &mut interleave.main[lane.clone()],
                );
                let side_input = if index < side_channels {
                    deinterleave(
                        &side[done * side_channels..],
                        side_channels,
                        index,
                        &mut interleave.side[lane.clone()],
                    );
                    Some(&interleave.side[lane.clone()])
                } else {
                    None
                };
                let input = &interleave.main[lane.clone()];
                report_invalid("input", index, input);
                process_single_channel(
                    &parameters,
                    fft,
                    scratch,
                    &mut channel_set.channel(index),
                    index,
                    input,
                    side_input,
                    &mut interleave.output[lane.clone()],
                );
                report_invalid("output", index, &interleave.output[lane.clone()]);
                interleave_into(
                    &interleave.output[lane],
                    channels,
                    index,
                    &mut output[done * channels..],
                );
            }
            done += block;
        }
    }
}

fn deinterleave(interleaved: &[f32], channels: usize, index: usize, lane: &mut [f32]) {
    for (sample, frame) in lane.iter_mut().zip(interleaved.chunks_exact(channels)) {
        *sample = frame[index];
    }
}

fn interleave_into(lane: &[f32], channels: usize, index: usize, interleaved: &mut [f32]) {
    for (sample, frame) in lane.iter().zip(interleaved.chunks_exact_mut(channels)) {
        frame[index] = *sample;
    }
}

#[cfg(debug_assertions)]
fn report_invalid(what: &str, channel: usize, samples: &[f32]) {
    use crate::debug::find_invalid_sample;
    use crate::sw_log;

    if let Some((index, value)) = find_invalid_sample(samples) {
        sw_log!("invalid {} sample {} at {} on channel {}", what, value, index, channel);
    }
}

#[cfg(not(debug_assertions))]
fn report_invalid(_what: &str, _channel: usize, _samples: &[f32]) {}

/// Feeds one channel's block through the FIFO, running a frame whenever one
/// is due, and fills `output` with the same number of samples.
#[allow(clippy::too_many_arguments)]
fn process_single_channel(
    parameters: &HopParameters<'_>,
    fft: &mut FftEngine,
    scratch: &mut [f32],
    channel: &mut ChannelBuffers<'_>,
    channel_index: usize,
    input: &[f32],
    side_input: Option<&[f32]>,
    output: &mut [f32],
) {
    let setup = parameters.setup;
    let fft_size = setup.fft_size();
    let window_size_factor = setup.window_size_factor() as usize;
    let use_side = side_input.is_some();

    let mut consumed = 0;
    while consumed < input.len() {
        let to_consume = channel.input_space().min(input.len() - consumed);
        let range = consumed..consumed + to_consume;
        channel.add_new_data(&input[range.clone()], side_input.map(|s| &s[range.clone()]));

        if channel.frame_ready() {
            {
                let mut data = channel.analyse(
                    use_side,
                    fft,
                    parameters.analysis_window,
                    window_size_factor,
                    scratch,
                );
                for module in parameters.modules {
                    module.process(channel_index, &mut data, setup);
                }
                data.synthesise(fft, &mut scratch[..fft_size], window_size_factor == 1);
            }
            channel.overlap_add(&scratch[..fft_size], parameters.synthesis_window);
            channel.finish_hop(parameters.scaling, parameters.dry_scaling);
            channel.advance_by_hop(use_side);
        }

        let chunk = &mut output[range];
        let deficit = to_consume - channel.ready_len().min(to_consume);
        chunk[..deficit].fill(0.0);
        channel.extract_ready(&mut chunk[deficit..]);
        consumed += to_consume;
    }
}

/// Exclusive access to the engine state, held for as long as the guard
/// lives. `process()` cannot run meanwhile.
///
/// Every configuration change is available here, so a caller can apply
/// several edits under one acquisition. The `Processor` setters take the
/// lock for a single edit and delegate to the same methods.
pub struct ProcessingLock<'a> {
    state: MutexGuard<'a, EngineState>,
    chain: &'a ModuleChain,
    factory: &'a ModuleFactory,
}

impl ProcessingLock<'_> {
    pub fn setup(&self) -> &Setup {
        &self.state.setup
    }

    pub fn active_factors(&self) -> StorageFactors {
        self.state.active
    }

    pub fn requested_factors(&self) -> StorageFactors {
        self.state.requested
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_allocated()
    }

    pub fn latency_in_samples(&self) -> usize {
        if self.state.is_allocated() {
            self.state.setup.latency_in_samples()
        } else {
            0
        }
    }

    pub fn storage_size(&self) -> usize {
        self.state.storage_size()
    }

    pub fn lfo_timer(&self) -> &LfoTimer {
        &self.state.lfo_timer
    }

    /// For host transport updates.
    pub fn lfo_timer_mut(&mut self) -> &mut LfoTimer {
        &mut self.state.lfo_timer
    }

    // Configuration

    /// Applies a complete configuration and resets the engine.
    pub fn initialise(&mut self, config: &EngineConfig) -> EngineResult<()> {
        config.validate()?;
        let state = &mut *self.state;
        let previous_limit = state.storage_limit;
        let previous_window = state.window_function;
        let previous_side = state.side_channels;
        state.storage_limit = config.storage_limit_bytes;
        state.window_function = config.window_function;
        state.side_channels = config.side_channels;

        if let Err(error) = state.apply_factors(self.chain, config.storage_factors()) {
            state.storage_limit = previous_limit;
            state.window_function = previous_window;
            state.side_channels = previous_side;
            return Err(error);
        }
        state.set_side_channels(config.side_channels);
        // The sample-rate-only path keeps the old windows and buffers.
        state.update_windows();
        self.reset();
        Ok(())
    }

    fn change_factors(
        &mut self,
        change: impl FnOnce(StorageFactors) -> StorageFactors,
    ) -> EngineResult<()> {
        let new = change(self.state.requested);
        self.state.apply_factors(self.chain, new)
    }

    /// Only modules are resized; buffers keep their contents.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> EngineResult<()> {
        if sample_rate == 0 {
            return Err(EngineError::InvalidSampleRate(0));
        }
        self.change_factors(|f| f.with_sample_rate(sample_rate))
    }

    pub fn set_fft_size(&mut self, fft_size: u16) -> EngineResult<()> {
        self.change_factors(|f| StorageFactors { fft_size, ..f })
    }

    pub fn set_overlap_factor(&mut self, overlap_factor: u8) -> EngineResult<()> {
        self.change_factors(|f| StorageFactors {
            overlap_factor,
            ..f
        })
    }

    pub fn set_window_size_factor(&mut self, window_size_factor: u8) -> EngineResult<()> {
        self.change_factors(|f| StorageFactors {
            window_size_factor,
            ..f
        })
    }

    /// `side` side-chain channels feed the first `side` main channels.
    pub fn set_number_of_channels(&mut self, main: u8, side: u8) -> EngineResult<()> {
        if main == 0 || side > main {
            return Err(EngineError::InvalidChannelCount { main, side });
        }
        let state = &mut *self.state;
        let previous_side = state.side_channels;
        // Checked against the new channel count inside apply_factors.
        state.side_channels = side.min(previous_side);
        let new = StorageFactors {
            number_of_channels: main,
            ..state.requested
        };
        let result = state.apply_factors(self.chain, new);
        state.side_channels = previous_side;
        result?;
        state.set_side_channels(side);
        Ok(())
    }

    pub fn set_window_function(&mut self, window_function: WindowFunction) {
        self.state.window_function = window_function;
        if self.state.is_allocated() {
            self.state.update_windows();
        }
    }

    /// Clears every buffer, rewinds the LFO timer and resets all modules.
    pub fn reset(&mut self) {
        if self.state.is_allocated() {
            self.state.reset_channels();
        }
        self.state.lfo_timer.reset();
        self.chain.reset_all();
    }

    // Modules

    /// Creates a detached module already sized for the active configuration.
    pub fn create_module(&self, effect_type: u8) -> EngineResult<ModuleHandle> {
        let effect = self.factory.create(effect_type)?;
        let node = ModuleNode::new(effect_type, effect);
        let active = self.state.active;
        if active.is_complete() && !node.resize(&active) {
            log::warn!("effect {} rejected {:?}", effect_type, active);
            return Err(EngineError::ModuleCreationFailed(effect_type));
        }
        Ok(self.chain.make_handle(node))
    }

    /// Links `module` at `position`, replacing the module there, after
    /// sizing it for the active configuration. A module that refuses the
    /// active factors is not linked.
    pub fn insert_module(
        &self,
        position: usize,
        module: ModuleHandle,
    ) -> EngineResult<Option<ModuleHandle>> {
        let active = self.state.active;
        if active.is_complete() && module.factors() != active && !module.resize(&active) {
            log::warn!("{} rejected {:?} on insertion", module.name(), active);
            return Err(EngineError::ModuleCreationFailed(module.effect_type()));
        }
        self.chain.insert_at_and_replace(position, module)
    }

    pub fn push_module(&self, module: ModuleHandle) -> EngineResult<()> {
        self.insert_module(usize::MAX, module).map(|_| ())
    }
}

pub struct Processor {
    chain: ModuleChain,
    factory: ModuleFactory,
    state: Mutex<EngineState>,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor {
    /// An engine with the built-in effects and nothing allocated yet.
    pub fn new() -> Self {
        Self::with_factory(builtin_factory())
    }

    pub fn with_factory(factory: ModuleFactory) -> Self {
        Self {
            chain: ModuleChain::new(),
            factory,
            state: Mutex::new(EngineState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Not reentrant: while the guard is alive, edit through it rather than
    /// through the `Processor` setters.
    pub fn processing_lock(&self) -> ProcessingLock<'_> {
        ProcessingLock {
            state: self.lock_state(),
            chain: &self.chain,
            factory: &self.factory,
        }
    }

    /// Lookup, removal and reordering. Insertion goes through
    /// [`Processor::insert_module`] so the module is sized first.
    pub fn module_chain(&self) -> &ModuleChain {
        &self.chain
    }

    pub fn factory(&self) -> &ModuleFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut ModuleFactory {
        &mut self.factory
    }

    pub fn engine_setup(&self) -> Setup {
        self.lock_state().setup
    }

    pub fn active_factors(&self) -> StorageFactors {
        self.lock_state().active
    }

    pub fn requested_factors(&self) -> StorageFactors {
        self.lock_state().requested
    }

    /// True once storage has been allocated for a complete configuration.
    pub fn is_ready(&self) -> bool {
        self.processing_lock().is_ready()
    }

    pub fn latency_in_samples(&self) -> usize {
        self.processing_lock().latency_in_samples()
    }

    /// Bytes held by the shared storage and the FFT work buffers.
    pub fn storage_size(&self) -> usize {
        self.processing_lock().storage_size()
    }

    // Configuration

    pub fn initialise(&self, config: &EngineConfig) -> EngineResult<()> {
        self.processing_lock().initialise(config)
    }

    pub fn set_sample_rate(&self, sample_rate: u32) -> EngineResult<()> {
        self.processing_lock().set_sample_rate(sample_rate)
    }

    pub fn set_fft_size(&self, fft_size: u16) -> EngineResult<()> {
        self.processing_lock().set_fft_size(fft_size)
    }

    pub fn set_overlap_factor(&self, overlap_factor: u8) -> EngineResult<()> {
        self.processing_lock().set_overlap_factor(overlap_factor)
    }

    pub fn set_window_size_factor(&self, window_size_factor: u8) -> EngineResult<()> {
        self.processing_lock()
            .set_window_size_factor(window_size_factor)
    }

    pub fn set_number_of_channels(&self, main: u8, side: u8) -> EngineResult<()> {
        self.processing_lock().set_number_of_channels(main, side)
    }

    pub fn set_window_function(&self, window_function: WindowFunction) {
        self.processing_lock().set_window_function(window_function);
    }

    pub fn reset(&self) {
        self.processing_lock().reset();
    }

    pub fn create_module(&self, effect_type: u8) -> EngineResult<ModuleHandle> {
        self.processing_lock().create_module(effect_type)
    }

    pub fn insert_module(
        &self,
        position: usize,
        module: ModuleHandle,
    ) -> EngineResult<Option<ModuleHandle>> {
        self.processing_lock().insert_module(position, module)
    }

    pub fn push_module(&self, module: ModuleHandle) -> EngineResult<()> {
        self.processing_lock().push_module(module)
    }

    // Processing

    /// Processes one block of separate channel buffers.
    ///
    /// `main` and `outputs` hold one slice per channel, `side` one per side
    /// channel. Each must be at least `number_of_samples` long. Never
    /// allocates and never fails; without a usable configuration the output
    /// is silence.
    pub fn process(
        &self,
        main: &[&[f32]],
        side: &[&[f32]],
        outputs: &mut [&mut [f32]],
        number_of_samples: usize,
        output_gain: f32,
        mix_amount: f32,
    ) {
        if number_of_samples == 0 {
            return;
        }
        let mut state = self.lock_state();
        no_denormals(|| {
            state.process(
                &self.chain,
                main,
                side,
                outputs,
                number_of_samples,
                output_gain,
                mix_amount,
            )
        });
    }

    /// Processes one block of interleaved frames. `side` is interleaved with
    /// the side channel count and may be empty when there is none.
    pub fn process_interleaved(
        &self,
        main: &[f32],
        side: &[f32],
        output: &mut [f32],
        number_of_samples: usize,
        output_gain: f32,
        mix_amount: f32,
    ) {
        if number_of_samples == 0 {
            return;
        }
        let mut state = self.lock_state();
        no_denormals(|| {
            state.process_interleaved(
                &self.chain,
                main,
                side,
                output,
                number_of_samples,
                output_gain,
                mix_amount,
            )
        });
    }
}
