//! Ordered list of modules shared between the control and audio threads.
//!
//! The chain is published as an immutable `Vec` of node handles inside a
//! `basedrop::SharedCell`. Every edit clones the current list, changes the
//! clone and swaps it in. The audio thread takes the current list with
//! [`ModuleChain::snapshot`] without locking and keeps every node it visits
//! alive for as long as it holds the snapshot.
//!
//! # Consistency
//! A traversal that started before a `remove` finishes over the list it
//! took, so the removed module may process one more frame. A traversal that
//! starts after `remove` returned never sees it. Node identity survives
//! moves: handles stay valid and keep pointing at the same node.
//!
//! Lists and nodes are freed by the collector thread (see `engine::gc`),
//! never on the audio thread.

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::gc::gc_handle;
use crate::engine::lfo::LfoTimer;
use crate::engine::module::{LinkState, ModuleNode};
use crate::engine::setup::Setup;
use crate::engine::storage::StorageFactors;
use basedrop::{Handle, Shared, SharedCell};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Reference-counted handle to a module node.
pub type ModuleHandle = Shared<ModuleNode>;

pub struct ModuleChain {
    modules: SharedCell<Vec<ModuleHandle>>,
    // Serialises edits. Readers never take it.
    edit: Mutex<()>,
    handle: Handle,
}

impl Default for ModuleChain {
    fn default() -> Self {
        Self::new()
    }
}

fn same_node(a: &ModuleHandle, b: &ModuleNode) -> bool {
    std::ptr::eq(&**a, b)
}

impl ModuleChain {
    pub fn new() -> Self {
        let handle = gc_handle();
        Self {
            modules: SharedCell::new(Shared::new(&handle, Vec::new())),
            edit: Mutex::new(()),
            handle,
        }
    }

    /// Wraps a node so it can be inserted into this chain.
    pub fn make_handle(&self, node: ModuleNode) -> ModuleHandle {
        Shared::new(&self.handle, node)
    }

    /// The current list. Lock-free and allocation-free.
    pub fn snapshot(&self) -> Shared<Vec<ModuleHandle>> {
        self.modules.get()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn module(&self, index: usize) -> Option<ModuleHandle> {
        self.snapshot().get(index).cloned()
    }

    /// Position of `node`, or `None` once it has been removed.
    pub fn index_of(&self, node: &ModuleNode) -> Option<usize> {
        if node.link_state() != LinkState::Linked {
            return None;
        }
        self.snapshot().iter().position(|m| same_node(m, node))
    }

    /// Visits every module in chain order.
    pub fn for_each<F: FnMut(&ModuleNode)>(&self, mut f: F) {
        let modules = self.snapshot();
        for module in modules.iter() {
            f(module);
        }
    }

    fn lock_edit(&self) -> MutexGuard<'_, ()> {
        self.edit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn edit<R>(&self, f: impl FnOnce(&mut Vec<ModuleHandle>) -> R) -> R {
        let _guard = self.lock_edit();
        let mut next: Vec<ModuleHandle> = self.snapshot().iter().cloned().collect();
        let result = f(&mut next);
        self.modules.set(Shared::new(&self.handle, next));
        result
    }

    /// Puts `node` at `position`. If a module was there it is unlinked in the
    /// same step and returned; a position at or past the end appends.
    ///
    /// Does not size the node. Callers go through `ProcessingLock`, which
    /// resizes it to the active factors first.
    pub(crate) fn insert_at_and_replace(
        &self,
        position: usize,
        node: ModuleHandle,
    ) -> EngineResult<Option<ModuleHandle>> {
        node.mark_linked()?;
        log::debug!("linking {} at {}", node.name(), position);
        Ok(self.edit(|modules| {
            if position < modules.len() {
                let replaced = std::mem::replace(&mut modules[position], node);
                replaced.mark_unlinked();
                Some(replaced)
            } else {
                modules.push(node);
                None
            }
        }))
    }

    pub(crate) fn push_back(&self, node: ModuleHandle) -> EngineResult<()> {
        self.insert_at_and_replace(usize::MAX, node).map(|_| ())
    }

    /// Unlinks `node`. Returns false if it was not in the chain.
    pub fn remove(&self, node: &ModuleNode) -> bool {
        if node.link_state() != LinkState::Linked {
            return false;
        }
        self.edit(|modules| match modules.iter().position(|m| same_node(m, node)) {
            Some(index) => {
                modules.remove(index).mark_unlinked();
                true
            }
            None => false,
        })
    }

    pub fn remove_at(&self, index: usize) -> Option<ModuleHandle> {
        self.edit(|modules| {
            if index >= modules.len() {
                return None;
            }
            let removed = modules.remove(index);
            removed.mark_unlinked();
            Some(removed)
        })
    }

    /// Moves the module at `source` so that it ends up at `target`.
    pub fn move_module(&self, source: usize, target: usize) -> bool {
        self.edit(|modules| {
            let len = modules.len();
            debug_assert!(source < len && target < len, "module index out of range");
            if source >= len || target >= len {
                return false;
            }
            if source != target {
                let module = modules.remove(source);
                modules.insert(target, module);
            }
            true
        })
    }

    pub fn clear(&self) {
        self.edit(|modules| {
            for module in modules.drain(..) {
                module.mark_unlinked();
            }
        });
    }

    // Engine-wide passes

    pub fn pre_process_all(&self, timer: &LfoTimer, setup: &Setup) {
        self.for_each(|module| module.pre_process(timer, setup));
    }

    pub fn reset_all(&self) {
        self.for_each(ModuleNode::reset);
    }

    /// Offers `new` to every module in order. If module `k` refuses, modules
    /// `0..k` are put back on `old` and nothing is left half-migrated.
    pub fn resize_all(&self, new: &StorageFactors, old: &StorageFactors) -> EngineResult<()> {
        let modules = self.snapshot();
        for (index, module) in modules.iter().enumerate() {
            if module.resize(new) {
                continue;
            }
            log::warn!("module {} ({}) rejected {:?}", index, module.name(), new);
            for adapted in modules[..index].iter().rev() {
                if !adapted.resize(old) {
                    log::warn!("module {} could not return to {:?}", adapted.name(), old);
                }
            }
            return Err(EngineError::ModuleResizeRejected { index });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::channel_data::ChannelData;
    use crate::engine::module::{Effect, EffectInfo, ModuleContext};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    static TAG_INFO: EffectInfo = EffectInfo {
        name: "Tag",
        parameters: &[],
    };

    struct Tag {
        accept: bool,
    }

    impl Effect for Tag {
        fn info(&self) -> &'static EffectInfo {
            &TAG_INFO
        }

        fn process(&mut self, _context: &ModuleContext<'_>, _data: &mut ChannelData<'_>) {}

        fn resize(&mut self, _factors: &StorageFactors) -> bool {
            self.accept
        }
    }

    fn chain_of(count: u8) -> (ModuleChain, Vec<ModuleHandle>) {
        let chain = ModuleChain::new();
        let handles: Vec<_> = (0..count)
            .map(|i| chain.make_handle(ModuleNode::new(i, Box::new(Tag { accept: true }))))
            .collect();
        for handle in &handles {
            chain.push_back(handle.clone()).unwrap();
        }
        (chain, handles)
    }

    fn order(chain: &ModuleChain) -> Vec<u8> {
        let mut types = Vec::new();
        chain.for_each(|m| types.push(m.effect_type()));
        types
    }

    #[test]
    fn test_module_lookup() {
        let (chain, handles) = chain_of(3);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.module(1).map(|m| m.effect_type()), Some(1));
        assert!(chain.module(3).is_none());
        assert_eq!(chain.index_of(&handles[2]), Some(2));
    }

    #[test]
    fn test_insert_and_replace() {
        let (chain, handles) = chain_of(3);
        let new = chain.make_handle(ModuleNode::new(9, Box::new(Tag { accept: true })));
        let replaced = chain.insert_at_and_replace(1, new.clone()).unwrap();
        assert!(replaced.is_some());
        assert_eq!(order(&chain), vec![0, 9, 2]);
        assert_eq!(handles[1].link_state(), LinkState::Unlinked);
        assert_eq!(chain.index_of(&handles[1]), None);

        let appended = chain.make_handle(ModuleNode::new(8, Box::new(Tag { accept: true })));
        assert!(chain.insert_at_and_replace(10, appended).unwrap().is_none());
        assert_eq!(order(&chain), vec![0, 9, 2, 8]);

        assert_eq!(
            chain.insert_at_and_replace(0, new).err(),
            Some(EngineError::ModuleAlreadyLinked)
        );
    }

    #[test]
    fn test_removed_node_cannot_be_relinked() {
        let (chain, handles) = chain_of(2);
        assert!(chain.remove(&handles[0]));
        assert!(!chain.remove(&handles[0]));
        assert_eq!(
            chain.push_back(handles[0].clone()),
            Err(EngineError::ModuleAlreadyLinked)
        );
        assert_eq!(order(&chain), vec![1]);
    }

    #[test]
    fn test_move_module_keeps_identity() {
        let (chain, handles) = chain_of(5);
        assert!(chain.move_module(1, 3));
        assert_eq!(order(&chain), vec![0, 2, 3, 1, 4]);
        assert!(chain.move_module(3, 1));
        let snapshot = chain.snapshot();
        for (position, handle) in handles.iter().enumerate() {
            assert!(same_node(&snapshot[position], handle));
        }
    }

    #[test]
    fn test_resize_rolls_back_on_rejection() {
        let chain = ModuleChain::new();
        for accept in [true, true, false, true] {
            let node = ModuleNode::new(0, Box::new(Tag { accept }));
            chain.push_back(chain.make_handle(node)).unwrap();
        }
        let old = StorageFactors {
            fft_size: 512,
            window_size_factor: 1,
            overlap_factor: 4,
            number_of_channels: 2,
            sample_rate: 44_100,
        };
        // module 2 refuses everything, so settle the others on `old` directly
        for index in [0, 1, 3] {
            assert!(chain.module(index).unwrap().resize(&old));
        }
        let new = StorageFactors {
            fft_size: 2048,
            ..old
        };
        assert_eq!(
            chain.resize_all(&new, &old),
            Err(EngineError::ModuleResizeRejected { index: 2 })
        );
        for index in [0, 1, 3] {
            assert_eq!(chain.module(index).unwrap().factors(), old);
        }
    }

    #[test]
    fn test_removal_during_iteration() {
        for _ in 0..200 {
            let (chain, handles) = chain_of(5);
            let chain = Arc::new(chain);
            let started = Arc::new(AtomicBool::new(false));

            let reader = {
                let chain = Arc::clone(&chain);
                let started = Arc::clone(&started);
                thread::spawn(move || {
                    let mut traversals = Vec::new();
                    for _ in 0..50 {
                        traversals.push(order(&chain));
                        started.store(true, Ordering::Release);
                    }
                    traversals
                })
            };
            while !started.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
            assert!(chain.remove(&handles[2]));

            for traversal in reader.join().unwrap() {
                assert!(
                    traversal == vec![0, 1, 2, 3, 4] || traversal == vec![0, 1, 3, 4],
                    "unexpected traversal {:?}",
                    traversal
                );
            }
            assert_eq!(order(&chain), vec![0, 1, 3, 4]);
        }
    }
}
