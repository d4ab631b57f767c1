//! Simulation controller
//!
//! Owns the run lifecycle (`Inactive` -> `Active` <-> `Paused` -> `Inactive`)
//! and the [`Stepper`], which holds the flattened state vector, the current
//! time, the force model and the solver. While active, the stepper either
//! lives on a dedicated background thread paced by a [`Clock`], or stays in
//! the controller and is driven by the host through [`Simulation::tick`].
//!
//! Each tick advances simulated time by `simulation_speed / frame_rate`,
//! publishes every body's new state under one write lock, then signals the
//! [`FrameSink`]. If the solver fails, the last valid state is published and
//! the run drops back to `Inactive`.

use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::clock::{Clock, FramePacer, SystemClock};
use super::error::{IntegrationError, SimError};
use super::forces::GravityModel;
use super::integrator::{DormandPrince54, OdeSolver};
use super::settings::Settings;
use super::states::{self, Body, NVec, SharedBodies, StateLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    Inactive,
    Active,
    Paused,
}

impl fmt::Display for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SimulationState::Inactive => "inactive",
            SimulationState::Active => "active",
            SimulationState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// "Frame ready" notification sent after every published tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub tick: u64,
    pub time: f64,
}

/// Receives a [`Frame`] once per published tick, from the stepping thread
pub trait FrameSink: Send + Sync {
    fn frame_ready(&self, frame: Frame);
}

/// Drops every frame
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn frame_ready(&self, _frame: Frame) {}
}

impl FrameSink for mpsc::Sender<Frame> {
    fn frame_ready(&self, frame: Frame) {
        // A hung-up receiver just means nobody is drawing anymore
        let _ = self.send(frame);
    }
}

/// Who drives the ticks while the simulation is active
#[derive(Clone)]
pub enum Scheduling {
    /// Dedicated thread, one tick per frame budget on the given clock
    Background(Arc<dyn Clock>),
    /// No thread; the host calls [`Simulation::tick`]
    Manual,
}

impl Default for Scheduling {
    fn default() -> Self {
        Scheduling::Background(Arc::new(SystemClock::new()))
    }
}

impl fmt::Debug for Scheduling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheduling::Background(_) => f.write_str("Background"),
            Scheduling::Manual => f.write_str("Manual"),
        }
    }
}

#[derive(Debug)]
struct Lifecycle(Mutex<SimulationState>);

impl Lifecycle {
    fn new() -> Self {
        Self(Mutex::new(SimulationState::Inactive))
    }

    fn get(&self) -> SimulationState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the previous state
    fn set(&self, state: SimulationState) -> SimulationState {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, state)
    }

    /// Move `from -> to` only if currently in `from`
    fn transition(&self, from: SimulationState, to: SimulationState) -> bool {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard == from {
            *guard = to;
            true
        } else {
            false
        }
    }
}

/// State owned by the stepping loop: flattened bodies, time, force model, solver
pub struct Stepper {
    model: GravityModel,
    solver: Box<dyn OdeSolver + Send>,
    layout: StateLayout,
    state: NVec,
    time: f64,
    dt: f64,
    tick: u64,
    bodies: SharedBodies,
}

impl Stepper {
    /// Reset `bodies` to the configured initial state, seed any skip-ahead,
    /// and publish the starting frame
    fn prepare(settings: &Settings, bodies: SharedBodies) -> Result<Self, SimError> {
        let fresh: Vec<Body> = settings
            .bodies()
            .iter()
            .cloned()
            .map(|mut b| {
                b.clear_trail();
                b
            })
            .collect();
        let layout = StateLayout::of(&fresh).ok_or(SimError::NoBodies)?;
        let mut model = GravityModel::for_bodies(settings.gravitational_constant(), &fresh);
        let mut solver = DormandPrince54::new(*settings.solver());
        let mut state = states::flatten(&fresh);
        let time = settings.skip_ahead();

        if time != 0.0 {
            let stats = solver.advance(&mut model, 0.0, &mut state, time)?;
            log::info!(
                "skipped ahead to t = {time} ({} steps, {} rejected)",
                stats.accepted,
                stats.rejected
            );
        }
        model.prime(time, &state);

        bodies.replace(fresh);
        bodies.publish(&layout, &state, model.snapshot());

        Ok(Self {
            model,
            solver: Box::new(solver),
            layout,
            state,
            time,
            dt: settings.tick_duration(),
            tick: 0,
            bodies,
        })
    }

    /// Advance one tick and publish it. On error nothing is committed.
    fn tick(&mut self) -> Result<Frame, IntegrationError> {
        let target = self.time + self.dt;
        let mut next = self.state.clone();
        let stats = self
            .solver
            .advance(&mut self.model, self.time, &mut next, target)?;

        self.state = next;
        self.time = target;
        self.tick += 1;
        self.bodies
            .publish(&self.layout, &self.state, self.model.snapshot());

        log::trace!(
            "tick {} -> t = {} ({} steps, {} evaluations)",
            self.tick,
            self.time,
            stats.accepted,
            stats.evaluations
        );
        Ok(Frame {
            tick: self.tick,
            time: self.time,
        })
    }

    /// Publish the last valid state without a trail point, then clear
    /// trails and renumber ids for the next run
    fn halt(&mut self) {
        // A failed advance leaves a trial evaluation in the snapshot
        self.model.prime(self.time, &self.state);
        self.bodies
            .sync(&self.layout, &self.state, self.model.snapshot());
        self.bodies.reset_for_next_run();
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn state(&self) -> &NVec {
        &self.state
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }
}

/// The periodic task run on the background thread
fn run_loop(
    mut stepper: Stepper,
    lifecycle: &Lifecycle,
    clock: &dyn Clock,
    sink: &dyn FrameSink,
    pacer: FramePacer,
) -> Stepper {
    while lifecycle.get() == SimulationState::Active {
        let started = clock.now();

        match stepper.tick() {
            Ok(frame) => sink.frame_ready(frame),
            Err(err) => {
                log::error!("integration failed at t = {}: {err}; stopping", stepper.time());
                // Lost the race against pause/stop: whoever changed the state cleans up
                if lifecycle.transition(SimulationState::Active, SimulationState::Inactive) {
                    stepper.halt();
                }
                break;
            }
        }

        let elapsed = clock.now().saturating_sub(started);
        match pacer.remaining(elapsed) {
            Some(rest) => clock.sleep(rest),
            None => log::trace!(
                "tick {} overran its {:?} budget ({elapsed:?})",
                stepper.ticks(),
                pacer.budget()
            ),
        }
    }
    stepper
}

pub struct Simulation {
    settings: Option<Settings>,
    bodies: SharedBodies,
    lifecycle: Arc<Lifecycle>,
    scheduling: Scheduling,
    sink: Arc<dyn FrameSink>,
    stepper: Option<Stepper>, // held here while paused, or always under manual scheduling
    worker: Option<JoinHandle<Stepper>>,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation::new()
    }
}

impl Simulation {
    /// Unconfigured simulation on the system clock
    pub fn new() -> Self {
        Self {
            settings: None,
            bodies: SharedBodies::default(),
            lifecycle: Arc::new(Lifecycle::new()),
            scheduling: Scheduling::default(),
            sink: Arc::new(NullSink),
            stepper: None,
            worker: None,
        }
    }

    pub fn with_settings(settings: Settings) -> Self {
        let mut sim = Simulation::new();
        sim.bodies.replace(settings.bodies().to_vec());
        sim.settings = Some(settings);
        sim
    }

    pub fn with_scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }

    pub fn with_sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Replace the settings; only allowed while inactive
    pub fn configure(&mut self, settings: Settings) -> Result<(), SimError> {
        let state = self.lifecycle.get();
        if state != SimulationState::Inactive {
            return Err(SimError::InvalidState {
                operation: "configure",
                state,
            });
        }
        self.bodies.replace(settings.bodies().to_vec());
        self.settings = Some(settings);
        Ok(())
    }

    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_ref()
    }

    pub fn state(&self) -> SimulationState {
        self.lifecycle.get()
    }

    /// Handle to the displayed bodies; clone it into the renderer
    pub fn bodies(&self) -> SharedBodies {
        self.bodies.clone()
    }

    /// Simulated time, available while the controller holds the stepper
    /// (paused, or manual scheduling)
    pub fn current_time(&self) -> Option<f64> {
        self.stepper.as_ref().map(Stepper::time)
    }

    /// Flattened state vector, same availability as [`Simulation::current_time`]
    pub fn state_vector(&self) -> Option<&NVec> {
        self.stepper.as_ref().map(Stepper::state)
    }

    pub fn start(&mut self) -> Result<(), SimError> {
        if self.settings.is_none() {
            return Err(SimError::NotConfigured);
        }

        match self.lifecycle.get() {
            SimulationState::Active => Err(SimError::InvalidState {
                operation: "start",
                state: SimulationState::Active,
            }),
            SimulationState::Paused => {
                self.lifecycle.set(SimulationState::Active);
                self.launch();
                log::info!("simulation resumed");
                Ok(())
            }
            SimulationState::Inactive => {
                if let Some(settings) = &self.settings {
                    settings.validate()?;
                }
                self.reap_worker();

                let stepper = match &self.settings {
                    Some(settings) => Stepper::prepare(settings, self.bodies.clone())?,
                    None => return Err(SimError::NotConfigured),
                };
                log::info!(
                    "simulation started: {} bodies, t = {}, dt = {} per tick",
                    stepper.layout.bodies,
                    stepper.time,
                    stepper.dt
                );
                self.stepper = Some(stepper);
                self.lifecycle.set(SimulationState::Active);
                self.launch();
                Ok(())
            }
        }
    }

    /// Stop ticking but keep the state vector and time
    pub fn pause(&mut self) -> Result<(), SimError> {
        if !self
            .lifecycle
            .transition(SimulationState::Active, SimulationState::Paused)
        {
            return Err(SimError::InvalidState {
                operation: "pause",
                state: self.lifecycle.get(),
            });
        }
        self.reclaim();
        log::info!("simulation paused");
        Ok(())
    }

    /// Publish the final state, then reset to inactive
    pub fn stop(&mut self) -> Result<(), SimError> {
        let previous = self.lifecycle.set(SimulationState::Inactive);
        if previous == SimulationState::Inactive {
            return Err(SimError::InvalidState {
                operation: "stop",
                state: previous,
            });
        }
        self.reclaim();
        match self.stepper.take() {
            Some(mut stepper) => stepper.halt(),
            None => self.bodies.reset_for_next_run(),
        }
        log::info!("simulation stopped");
        Ok(())
    }

    /// Run one tick on the caller's thread.
    ///
    /// Allowed while active under [`Scheduling::Manual`], or while paused
    /// (single-stepping). Returns `None` when the solver failed and the run
    /// was halted.
    pub fn tick(&mut self) -> Result<Option<Frame>, SimError> {
        let state = self.lifecycle.get();
        let allowed = match state {
            SimulationState::Active => matches!(self.scheduling, Scheduling::Manual),
            SimulationState::Paused => true,
            SimulationState::Inactive => false,
        };
        let stepper = match self.stepper.as_mut() {
            Some(stepper) if allowed => stepper,
            _ => {
                return Err(SimError::InvalidState {
                    operation: "tick",
                    state,
                })
            }
        };

        match stepper.tick() {
            Ok(frame) => {
                self.sink.frame_ready(frame);
                Ok(Some(frame))
            }
            Err(err) => {
                log::error!("integration failed at t = {}: {err}; stopping", stepper.time());
                stepper.halt();
                self.stepper = None;
                self.lifecycle.set(SimulationState::Inactive);
                Ok(None)
            }
        }
    }

    /// Hand the held stepper to a background thread, if that is the scheduling
    fn launch(&mut self) {
        let clock = match &self.scheduling {
            Scheduling::Background(clock) => Arc::clone(clock),
            Scheduling::Manual => return,
        };
        let stepper = match self.stepper.take() {
            Some(stepper) => stepper,
            None => return,
        };
        let budget = self
            .settings
            .as_ref()
            .map(Settings::frame_budget)
            .unwrap_or_default();
        let pacer = FramePacer::new(budget);
        let lifecycle = Arc::clone(&self.lifecycle);
        let sink = Arc::clone(&self.sink);

        self.worker = Some(thread::spawn(move || {
            run_loop(stepper, &lifecycle, clock.as_ref(), sink.as_ref(), pacer)
        }));
    }

    /// Join the worker after a pause/stop and take its stepper back
    fn reclaim(&mut self) {
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(stepper) => self.stepper = Some(stepper),
                Err(_) => {
                    log::error!("stepping thread panicked");
                    self.lifecycle.set(SimulationState::Inactive);
                    self.bodies.reset_for_next_run();
                }
            }
        }
    }

    /// Drop a worker that already ended on its own
    fn reap_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("stepping thread panicked");
            }
        }
        self.stepper = None;
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.lifecycle.set(SimulationState::Inactive);
            let _ = handle.join();
        }
    }
}
