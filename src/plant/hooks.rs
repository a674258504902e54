//! Ordered hook registries. Grounded on
//! `examples/original_source/cleave/client/plant.py::Plant` (`_start_of_step_hooks`,
//! `_end_of_step_hooks`, `_pre_sim_hooks`, each a `utils.HookCollection`
//! holding a plain list of callables appended to in order and iterated
//! front-to-back), re-expressed here as single-method capability traits so
//! a hook can be either a closure or a named type implementing the trait.

use log::warn;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use super::Ppm;

/// A step observer invoked with no arguments, at step start or step end.
pub trait StepObserver: Send + Sync {
    fn call(&self);
}

impl<F: Fn() + Send + Sync> StepObserver for F {
    fn call(&self) {
        self()
    }
}

/// A pre-sim observer invoked with the actuation about to be applied.
pub trait PreSimObserver: Send + Sync {
    fn call(&self, actuation: Option<&Ppm>);
}

impl<F: Fn(Option<&Ppm>) + Send + Sync> PreSimObserver for F {
    fn call(&self, actuation: Option<&Ppm>) {
        self(actuation)
    }
}

/// An ordered set of hooks, invoked in insertion order. A hook that panics
/// is logged and swallowed; it never aborts the step.
pub struct HookCollection<T: ?Sized> {
    hooks: Mutex<Vec<Box<T>>>,
}

impl<T: ?Sized> Default for HookCollection<T> {
    fn default() -> Self {
        Self { hooks: Mutex::new(Vec::new()) }
    }
}

impl HookCollection<dyn StepObserver> {
    pub fn add(&self, hook: Box<dyn StepObserver>) {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).push(hook);
    }

    pub fn call(&self) {
        let hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
        for hook in hooks.iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| hook.call())).is_err() {
                warn!("step observer hook panicked; continuing");
            }
        }
    }
}

impl HookCollection<dyn PreSimObserver> {
    pub fn add(&self, hook: Box<dyn PreSimObserver>) {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).push(hook);
    }

    pub fn call(&self, actuation: Option<&Ppm>) {
        let hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
        for hook in hooks.iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| hook.call(actuation))).is_err() {
                warn!("pre-sim observer hook panicked; continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn hooks_run_in_insertion_order() {
        let collection: HookCollection<dyn StepObserver> = HookCollection::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            collection.add(Box::new(move || order.lock().unwrap().push(i)));
        }
        collection.call();

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn a_panicking_hook_does_not_stop_the_rest() {
        let collection: HookCollection<dyn StepObserver> = HookCollection::default();
        let ran = Arc::new(AtomicU32::new(0));

        collection.add(Box::new(|| panic!("boom")));
        {
            let ran = ran.clone();
            collection.add(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }

        collection.call();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
