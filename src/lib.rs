//! Weighted overlap-add spectral processing.
//!
//! Audio is cut into overlapping windows, transformed, handed to a chain of
//! spectral modules and resynthesised. The host drives a [`Processor`]:
//! configure it with an [`EngineConfig`], add modules from its factory and
//! call [`Processor::process`] from the audio thread.
//!
//! ```no_run
//! use spectral_wola::{effects, EngineConfig, Processor};
//!
//! let processor = Processor::new();
//! processor.initialise(&EngineConfig::default())?;
//! let gate = processor.create_module(effects::GATE)?;
//! processor.push_module(gate)?;
//!
//! let input = vec![0.0f32; 512];
//! let mut left = vec![0.0f32; 512];
//! let mut right = vec![0.0f32; 512];
//! processor.process(&[&input, &input], &[], &mut [&mut left, &mut right], 512, 1.0, 1.0);
//! # Ok::<(), spectral_wola::EngineError>(())
//! ```

pub mod config;
pub mod debug;
pub mod effects;
pub mod engine;

pub use config::EngineConfig;
pub use engine::{EngineError, EngineResult, Processor, StorageFactors, WindowFunction};

#[cfg(any(test, feature = "assert_process_allocs"))]
#[global_allocator]
static ALLOCATOR: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;
