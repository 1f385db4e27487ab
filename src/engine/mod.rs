//! Spectral engine: storage, FFT, WOLA windows and the module chain.

pub mod channel_buffers;
pub mod channel_data;
pub mod constants;
pub mod error;
pub mod factory;
pub mod fft;
pub mod gc;
pub mod lfo;
pub mod module;
pub mod module_chain;
pub mod parameters;
pub mod processor;
pub mod setup;
pub mod storage;
pub mod window;

pub use channel_data::ChannelData;
pub use error::{EngineError, EngineResult};
pub use factory::ModuleFactory;
pub use lfo::{Lfo, LfoSettings, LfoTimer, Waveform};
pub use module::{Effect, EffectInfo, ModuleContext, ModuleNode, ModuleSnapshot};
pub use module_chain::{ModuleChain, ModuleHandle};
pub use parameters::{BaseParameter, EffectParameters, ParameterInfo, ParameterKind};
pub use processor::{ProcessingLock, Processor};
pub use setup::Setup;
pub use storage::StorageFactors;
pub use window::WindowFunction;
