//! Plant loop (C4): composes the periodic scheduler with a user-supplied
//! `State`, `Sensor`, and `Actuator`.
//!
//! Grounded on `examples/original_source/cleave/client/plant.py::Plant`
//! (`_step`, `hook_start_of_step`/`hook_end_of_step`/`hook_pre_sim`,
//! `sample_state`, `shutdown`) and on the thread-per-subsystem
//! architecture in `src/main.rs` (each subsystem owns a dedicated
//! `thread::spawn` domain, joined on shutdown).

pub mod hooks;

pub use hooks::{HookCollection, PreSimObserver, StepObserver};

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::error;
use parking_lot::ReentrantMutex;

use crate::codec::Ppm;
use crate::scheduler::execute_periodically;

#[derive(Debug)]
pub struct StateAdvanceError(pub String);
#[derive(Debug)]
pub struct SensorError(pub String);
#[derive(Debug)]
pub struct ActuatorError(pub String);

impl fmt::Display for StateAdvanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state advance failed: {}", self.0)
    }
}
impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor failed: {}", self.0)
    }
}
impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actuator failed: {}", self.0)
    }
}
impl std::error::Error for StateAdvanceError {}
impl std::error::Error for SensorError {}
impl std::error::Error for ActuatorError {}

/// Fatal plant-side errors: any of these triggers `shutdown()`.
#[derive(Debug)]
pub enum PlantError {
    StateAdvance(StateAdvanceError),
    Sensor(SensorError),
    Actuator(ActuatorError),
}

impl fmt::Display for PlantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlantError::StateAdvance(e) => write!(f, "{e}"),
            PlantError::Sensor(e) => write!(f, "{e}"),
            PlantError::Actuator(e) => write!(f, "{e}"),
        }
    }
}
impl std::error::Error for PlantError {}

/// The sole mutation point of a plant's dynamical state: advances by `dt_ns`
/// nanoseconds, optionally applying `actuation`, and returns a sample (the
/// Physical Property Mapping).
pub trait State: Send {
    fn advance(&mut self, dt_ns: u64, actuation: Option<&Ppm>) -> Result<Ppm, StateAdvanceError>;
}

/// Receives the plant's latest sample each step.
pub trait Sensor: Send {
    fn set_sample(&mut self, sample: Ppm) -> Result<(), SensorError>;
    fn shutdown(&mut self) {}
}

/// Queues actuation commands and yields the next one to apply, if any.
pub trait Actuator: Send {
    fn get_next_actuation(&mut self) -> Result<Option<Ppm>, ActuatorError>;
    fn shutdown(&mut self) {}
}

/// A periodic driver that advances a user-owned [`State`] at a fixed
/// nominal step, coordinating sensor sampling and actuation application.
pub struct Plant<S, Sn, Ac> {
    dt_ns: u64,
    state: Arc<ReentrantMutex<RefCell<S>>>,
    sensor: Arc<Mutex<Sn>>,
    actuator: Arc<Mutex<Ac>>,
    shutdown_flag: Arc<AtomicBool>,
    started: AtomicBool,
    step_count: Arc<AtomicU64>,
    start_of_step: Arc<HookCollection<dyn StepObserver>>,
    end_of_step: Arc<HookCollection<dyn StepObserver>>,
    pre_sim: Arc<HookCollection<dyn PreSimObserver>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S, Sn, Ac> Plant<S, Sn, Ac>
where
    S: State + Clone + 'static,
    Sn: Sensor + 'static,
    Ac: Actuator + 'static,
{
    pub fn new(dt_ns: u64, init_state: S, sensor: Sn, actuator: Ac) -> Self {
        Self {
            dt_ns,
            state: Arc::new(ReentrantMutex::new(RefCell::new(init_state))),
            sensor: Arc::new(Mutex::new(sensor)),
            actuator: Arc::new(Mutex::new(actuator)),
            shutdown_flag: Arc::new(AtomicBool::new(true)),
            started: AtomicBool::new(false),
            step_count: Arc::new(AtomicU64::new(0)),
            start_of_step: Arc::new(HookCollection::default()),
            end_of_step: Arc::new(HookCollection::default()),
            pre_sim: Arc::new(HookCollection::default()),
            worker: Mutex::new(None),
        }
    }

    pub fn hook_start_of_step(&self, f: impl Fn() + Send + Sync + 'static) {
        self.start_of_step.add(Box::new(f));
    }

    pub fn hook_end_of_step(&self, f: impl Fn() + Send + Sync + 'static) {
        self.end_of_step.add(Box::new(f));
    }

    pub fn hook_pre_sim(&self, f: impl Fn(Option<&Ppm>) + Send + Sync + 'static) {
        self.pre_sim.add(Box::new(f));
    }

    pub fn step_count(&self) -> u64 {
        self.step_count.load(Ordering::Acquire)
    }

    /// Thread- and process-safe snapshot of the current state.
    pub fn sample_state(&self) -> S {
        let guard = self.state.lock();
        guard.borrow().clone()
    }

    /// Starts the isolated execution domain running the step loop.
    /// Idempotent: a second call before `shutdown()` is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_flag.store(false, Ordering::Release);

        let dt_ns = self.dt_ns;
        let state = self.state.clone();
        let sensor = self.sensor.clone();
        let actuator = self.actuator.clone();
        let shutdown_flag = self.shutdown_flag.clone();
        let step_count = self.step_count.clone();
        let start_hooks = self.start_of_step.clone();
        let end_hooks = self.end_of_step.clone();
        let pre_sim_hooks = self.pre_sim.clone();

        let handle = thread::spawn(move || {
            let mut last_update = Instant::now();
            let shutdown_for_loop = shutdown_flag.clone();

            execute_periodically(
                || {
                    let result = run_step(
                        &state,
                        &sensor,
                        &actuator,
                        &start_hooks,
                        &end_hooks,
                        &pre_sim_hooks,
                        &mut last_update,
                    );
                    match result {
                        Ok(()) => {
                            step_count.fetch_add(1, Ordering::Release);
                        }
                        Err(e) => {
                            error!("plant step failed fatally: {e}");
                            shutdown_flag.store(true, Ordering::Release);
                        }
                    }
                },
                Duration::from_nanos(dt_ns),
                &shutdown_for_loop,
                |panic_err| {
                    error!("plant step panicked: {panic_err}");
                    shutdown_flag.store(true, Ordering::Release);
                },
            );
        });

        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Sets the shutdown flag and shuts down the sensor and actuator; blocks
    /// until the step loop thread has exited.
    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Release);
        self.sensor.lock().unwrap_or_else(|e| e.into_inner()).shutdown();
        self.actuator.lock().unwrap_or_else(|e| e.into_inner()).shutdown();

        if let Some(handle) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        self.started.store(false, Ordering::Release);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_step<S, Sn, Ac>(
    state: &ReentrantMutex<RefCell<S>>,
    sensor: &Mutex<Sn>,
    actuator: &Mutex<Ac>,
    start_hooks: &HookCollection<dyn StepObserver>,
    end_hooks: &HookCollection<dyn StepObserver>,
    pre_sim_hooks: &HookCollection<dyn PreSimObserver>,
    last_update: &mut Instant,
) -> Result<(), PlantError>
where
    S: State,
    Sn: Sensor,
    Ac: Actuator,
{
    start_hooks.call();

    let actuation = actuator
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get_next_actuation()
        .map_err(PlantError::Actuator)?;

    pre_sim_hooks.call(actuation.as_ref());

    let now = Instant::now();
    let dt_ns = now.duration_since(*last_update).as_nanos() as u64;

    let sample = {
        let guard = state.lock();
        let mut s = guard.borrow_mut();
        s.advance(dt_ns, actuation.as_ref()).map_err(PlantError::StateAdvance)?
    };
    *last_update = now;

    sensor
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .set_sample(sample)
        .map_err(PlantError::Sensor)?;

    end_hooks.call();
    Ok(())
}
