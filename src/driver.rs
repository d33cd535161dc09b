use crate::error::ConfigError;
use crate::world::World;
use anyhow::{anyhow, Result};
use cell_common::{CounterMessage, SimParams, SimulationConfig, SimulationMessage};
use log::{debug, error, info, trace, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Cadences of the driver loop, in simulated seconds.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub physics_dt: f64,
    /// Simulated seconds per wall-clock second.
    pub time_scale: f64,
    pub frame_interval: f64,
    pub counter_interval: f64,
    /// Catch-up cap; backlog beyond it is dropped.
    pub max_steps_per_iteration: u32,
}

impl DriverSettings {
    pub fn from_params(params: &SimParams) -> Self {
        Self {
            physics_dt: params.physics_dt,
            time_scale: params.time_scale,
            frame_interval: params.frame_interval,
            counter_interval: params.counter_interval,
            max_steps_per_iteration: params.max_steps_per_iteration.max(1),
        }
    }
}

/// Cooperative cancellation flag shared between the worker and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Requests handled by a driver while it runs on its worker thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlRequest {
    SetBounds { width: f64, height: f64 },
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// A stop was requested or the consumer went away.
    Stopped,
}

/// Runs a [`World`] at a fixed physics step and publishes its state.
///
/// Per step with changes: `Delta`. After each batch of steps, at the frame
/// cadence: `Frame`. Then, at the counter cadence: `Counters`. A consumer that
/// applied every delta up to a frame holds a collection matching that frame.
pub struct SimulationDriver {
    world: World,
    settings: DriverSettings,
    sender: Sender<SimulationMessage>,
    stop: StopToken,
    // Present while running on a worker thread
    controls: Option<Receiver<ControlRequest>>,

    accumulator: f64,
    since_frame: f64,
    since_counters: f64,
    // Set when an update panicked; cleared by reset()
    failure: Option<String>,
}

impl SimulationDriver {
    pub fn new(world: World, settings: DriverSettings, sender: Sender<SimulationMessage>) -> Self {
        Self {
            world,
            settings,
            sender,
            stop: StopToken::new(),
            controls: None,
            accumulator: 0.0,
            since_frame: 0.0,
            since_counters: 0.0,
            failure: None,
        }
    }

    pub fn from_config(config: &SimulationConfig, sender: Sender<SimulationMessage>) -> Result<Self> {
        let world = World::from_config(config)?;
        let settings = DriverSettings::from_params(world.params());
        Ok(Self::new(world, settings, sender))
    }

    pub fn world(&self) -> &World { &self.world }
    pub fn settings(&self) -> &DriverSettings { &self.settings }
    pub fn stop_token(&self) -> StopToken { self.stop.clone() }
    pub fn failure(&self) -> Option<&str> { self.failure.as_deref() }

    /// Repopulates the world, clears a previous failure or stop request and
    /// publishes `Scene` then `Frame`.
    pub fn reset(&mut self) {
        self.world.reinitialize();
        self.failure = None;
        self.stop.clear();
        self.reset_timers();

        self.send(SimulationMessage::Scene(self.world.scene()));
        self.send(SimulationMessage::Frame(self.world.frame()));
        info!("Simulation reset with {} discs.", self.world.discs().len());
    }

    /// Changes the world bounds. While the driver runs on its worker thread,
    /// use [`RunningSimulation::set_bounds`] instead.
    pub fn set_bounds(&mut self, width: f64, height: f64) -> Result<()> {
        self.world.set_bounds(width, height)?;
        Ok(())
    }

    /// One loop iteration: runs the physics steps that `elapsed` wall-clock time
    /// pays for (at most `max_steps_per_iteration`) and publishes messages.
    ///
    /// The stop flag is checked before every step. A panic inside an update
    /// is reported as `Failed` and returned as an error.
    pub fn advance(&mut self, elapsed: Duration) -> Result<LoopState> {
        if let Some(reason) = &self.failure {
            anyhow::bail!("simulation failed earlier ({}); reset required", reason);
        }

        let dt = self.settings.physics_dt;
        self.accumulator += elapsed.as_secs_f64() * self.settings.time_scale;

        let mut steps = 0;
        while self.accumulator >= dt {
            if self.stop.is_stop_requested() {
                return Ok(LoopState::Stopped);
            }
            if steps == self.settings.max_steps_per_iteration {
                let dropped = (self.accumulator / dt).floor();
                warn!("Simulation is falling behind; dropping {} physics steps.", dropped);
                self.accumulator %= dt;
                break;
            }

            let world = &mut self.world;
            let delta = match panic::catch_unwind(AssertUnwindSafe(|| world.update(dt))) {
                Ok(delta) => delta,
                Err(payload) => return Err(self.fail(payload)),
            };
            self.accumulator -= dt;
            self.since_frame += dt;
            self.since_counters += dt;
            steps += 1;

            if !delta.is_empty() && !self.send(SimulationMessage::Delta(delta)) {
                return Ok(LoopState::Stopped);
            }
        }

        if steps == 0 {
            return Ok(LoopState::Running);
        }
        trace!("Ran {} physics steps, now at step {}.", steps, self.world.step_count());

        if self.since_frame >= self.settings.frame_interval {
            self.since_frame = 0.0;
            if !self.send(SimulationMessage::Frame(self.world.frame())) {
                return Ok(LoopState::Stopped);
            }
        }
        if self.since_counters >= self.settings.counter_interval {
            self.since_counters = 0.0;
            if !self.publish_counters() {
                return Ok(LoopState::Stopped);
            }
        }
        Ok(LoopState::Running)
    }

    /// Runs the loop on the current thread until a stop request or a failure.
    pub fn run(&mut self) -> Result<()> {
        info!("Simulation loop started at step {}.", self.world.step_count());
        let mut last = Instant::now();

        loop {
            self.apply_control_requests();
            let now = Instant::now();
            let elapsed = now.duration_since(last);
            last = now;

            if self.advance(elapsed)? == LoopState::Stopped || self.stop.is_stop_requested() {
                break;
            }

            // Sleep until the next physics step is due.
            let due = (self.settings.physics_dt - self.accumulator).max(0.0) / self.settings.time_scale;
            thread::sleep(Duration::from_secs_f64(due.min(self.settings.frame_interval.max(0.001))));
        }

        self.finish();
        Ok(())
    }

    /// Moves the driver onto a worker thread.
    pub fn start(self) -> Result<RunningSimulation> {
        if let Some(reason) = &self.failure {
            anyhow::bail!("cannot start after failure ({}); reset first", reason);
        }
        self.stop.clear();
        let stop = self.stop.clone();
        let (controls, control_receiver) = mpsc::channel();

        let mut driver = self;
        driver.controls = Some(control_receiver);
        let handle = thread::Builder::new()
            .name("simulation".to_string())
            .spawn(move || {
                if let Err(e) = driver.run() {
                    error!("Simulation stopped with an error: {:#}", e);
                }
                driver
            })?;

        Ok(RunningSimulation { stop, controls, handle })
    }

    fn apply_control_requests(&mut self) {
        let Some(controls) = &self.controls else {
            return;
        };
        let requests: Vec<ControlRequest> = controls.try_iter().collect();
        for request in requests {
            match request {
                ControlRequest::SetBounds { width, height } => {
                    if let Err(e) = self.world.set_bounds(width, height) {
                        warn!("Ignoring bounds request: {}", e);
                    }
                }
            }
        }
    }

    // Drains the counters and announces the clean exit.
    fn finish(&mut self) {
        self.apply_control_requests();
        self.controls = None;
        self.publish_counters();
        self.send(SimulationMessage::Stopped { step: self.world.step_count() });
        self.reset_timers();
        self.stop.clear();
        info!("Simulation loop stopped at step {}.", self.world.step_count());
    }

    fn publish_counters(&mut self) -> bool {
        let message = CounterMessage {
            step: self.world.step_count(),
            simulation_time: self.world.simulation_time(),
            counts: self.world.get_and_reset_collision_counts(),
        };
        debug!("Publishing {} collisions at step {}.", message.total(), message.step);
        self.send(SimulationMessage::Counters(message))
    }

    fn fail(&mut self, payload: Box<dyn Any + Send>) -> anyhow::Error {
        let reason = panic_message(payload.as_ref());
        let step = self.world.step_count() + 1;
        error!("World update failed at step {}: {}", step, reason);

        self.world.get_and_reset_collision_counts();
        self.reset_timers();
        self.send(SimulationMessage::Failed(reason.clone()));
        self.failure = Some(reason.clone());
        anyhow!("world update failed at step {}: {}", step, reason)
    }

    fn reset_timers(&mut self) {
        self.accumulator = 0.0;
        self.since_frame = 0.0;
        self.since_counters = 0.0;
    }

    // False once the consumer has hung up.
    fn send(&self, message: SimulationMessage) -> bool {
        match self.sender.send(message) {
            Ok(()) => true,
            Err(_) => {
                debug!("Message receiver dropped; stopping.");
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a driver running on its worker thread.
pub struct RunningSimulation {
    stop: StopToken,
    controls: Sender<ControlRequest>,
    handle: JoinHandle<SimulationDriver>,
}

impl RunningSimulation {
    pub fn stop_token(&self) -> StopToken { self.stop.clone() }

    pub fn is_finished(&self) -> bool { self.handle.is_finished() }

    /// Forwards new bounds to the worker, applied before its next loop iteration.
    pub fn set_bounds(&self, width: f64, height: f64) -> Result<()> {
        if !(width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite()) {
            return Err(ConfigError::InvalidBounds { width, height }.into());
        }
        self.controls
            .send(ControlRequest::SetBounds { width, height })
            .map_err(|_| anyhow!("simulation worker has exited"))
    }

    /// Requests a stop, waits for the worker and hands the driver back.
    /// A run that failed can be inspected with [`SimulationDriver::failure`]
    /// and must be reset before it is started again.
    pub fn stop(self) -> Result<SimulationDriver> {
        self.stop.request_stop();
        self.handle.join().map_err(|_| anyhow!("simulation thread panicked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{DrawSource, FixedDraw};
    use cell_common::{DeltaMessage, Vec2};

    const SETUP: &str = r#"
        [universe]
        width = 200.0
        height = 200.0

        [timing]
        physics_dt_s = 0.01
        frame_interval_s = 0.02
        counter_interval_s = 0.05
        max_steps_per_iteration = 4

        [physics]
        unimolecular_rates = "per_step"

        [[disc_types]]
        name = "A"
        color = "red"
        radius = 2.0
        mass = 1.0

        [[disc_types]]
        name = "C"
        color = "blue"
        radius = 3.0
        mass = 2.0

        [[reactions]]
        reactants = ["C"]
        products = ["A", "A"]
        probability = 1.0

        [initial_conditions]
        distribution = { A = 5, C = 2 }
    "#;

    struct PanickingDraw;

    impl DrawSource for PanickingDraw {
        fn next_draw(&mut self) -> f64 {
            panic!("draw source exhausted")
        }
    }

    fn driver() -> (SimulationDriver, Receiver<SimulationMessage>) {
        let config = SimulationConfig::from_toml_str(SETUP).unwrap();
        let (sender, receiver) = mpsc::channel();
        let mut driver = SimulationDriver::from_config(&config, sender).unwrap();
        driver.world.set_draw_source(Box::new(FixedDraw(0.0)));
        (driver, receiver)
    }

    #[test]
    fn test_reset_publishes_scene_then_frame() {
        let (mut driver, receiver) = driver();
        driver.reset();

        let messages: Vec<_> = receiver.try_iter().collect();
        assert_eq!(messages.len(), 2);
        match (&messages[0], &messages[1]) {
            (SimulationMessage::Scene(scene), SimulationMessage::Frame(frame)) => {
                assert_eq!(scene.discs.len(), 7);
                assert_eq!(frame.positions.len(), 7);
            }
            other => panic!("unexpected messages {:?}", other),
        }
    }

    #[test]
    fn test_deltas_precede_frame_and_counters() {
        let (mut driver, receiver) = driver();
        driver.reset();
        receiver.try_iter().for_each(drop);

        let state = driver.advance(Duration::from_millis(45)).unwrap();
        assert_eq!(state, LoopState::Running);
        assert_eq!(driver.world().step_count(), 4);

        let messages: Vec<_> = receiver.try_iter().collect();
        let kinds: Vec<&str> = messages
            .iter()
            .map(|m| match m {
                SimulationMessage::Delta(_) => "delta",
                SimulationMessage::Frame(_) => "frame",
                SimulationMessage::Counters(_) => "counters",
                _ => "other",
            })
            .collect();
        // Both C discs decompose in the first step; later steps change nothing.
        assert_eq!(kinds, vec!["delta", "frame"]);
    }

    #[test]
    fn test_mirror_matches_frame() {
        let (mut driver, receiver) = driver();
        driver.reset();

        let mut mirror: Vec<Vec2> = Vec::new();
        for _ in 0..10 {
            driver.advance(Duration::from_millis(25)).unwrap();
        }
        for message in receiver.try_iter() {
            match message {
                SimulationMessage::Scene(scene) => mirror = scene.discs.iter().map(|d| d.position).collect(),
                SimulationMessage::Delta(delta) => delta.apply(&mut mirror, |d| d.position, |_, _| {}),
                SimulationMessage::Frame(frame) => {
                    assert_eq!(frame.positions.len(), mirror.len());
                    mirror = frame.positions.iter().map(|&(_, p)| p).collect();
                }
                _ => {}
            }
        }
        assert_eq!(mirror.len(), driver.world().discs().len());
    }

    #[test]
    fn test_step_cap_drops_backlog() {
        let (mut driver, _receiver) = driver();
        driver.reset();
        driver.advance(Duration::from_secs(10)).unwrap();
        assert_eq!(driver.world().step_count(), 4);
        driver.advance(Duration::ZERO).unwrap();
        assert_eq!(driver.world().step_count(), 4);
    }

    #[test]
    fn test_stop_is_observed_before_stepping() {
        let (mut driver, _receiver) = driver();
        driver.reset();
        driver.stop_token().request_stop();
        assert_eq!(driver.advance(Duration::from_millis(40)).unwrap(), LoopState::Stopped);
        assert_eq!(driver.world().step_count(), 0);
    }

    #[test]
    fn test_counters_published_at_cadence() {
        let (mut driver, receiver) = driver();
        driver.reset();
        for _ in 0..2 {
            driver.advance(Duration::from_millis(35)).unwrap();
        }
        let counters = receiver
            .try_iter()
            .filter(|m| matches!(m, SimulationMessage::Counters(_)))
            .count();
        assert_eq!(counters, 1);
    }

    #[test]
    fn test_failed_update_requires_reset() {
        let (mut driver, receiver) = driver();
        driver.reset();
        driver.world.set_draw_source(Box::new(PanickingDraw));

        assert!(driver.advance(Duration::from_millis(10)).is_err());
        assert!(driver.failure().is_some());
        assert!(receiver.try_iter().any(|m| matches!(m, SimulationMessage::Failed(_))));
        assert!(driver.advance(Duration::from_millis(10)).is_err());

        driver.world.set_draw_source(Box::new(FixedDraw(0.0)));
        driver.reset();
        assert!(driver.failure().is_none());
        assert!(driver.advance(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_reset_after_stop_request_steps_again() {
        let (mut driver, _receiver) = driver();
        driver.reset();
        driver.stop_token().request_stop();
        assert_eq!(driver.advance(Duration::from_millis(15)).unwrap(), LoopState::Stopped);

        driver.reset();
        assert!(!driver.stop_token().is_stop_requested());
        assert_eq!(driver.advance(Duration::from_millis(15)).unwrap(), LoopState::Running);
        assert_eq!(driver.world().step_count(), 1);
    }

    #[test]
    fn test_bounds_forwarded_to_running_worker() {
        let (mut driver, _receiver) = driver();
        driver.reset();

        let running = driver.start().unwrap();
        assert!(running.set_bounds(-1.0, 50.0).is_err());
        running.set_bounds(150.0, 120.0).unwrap();
        thread::sleep(Duration::from_millis(30));
        let driver = running.stop().unwrap();

        assert_eq!(driver.world().bounds(), Vec2::new(150.0, 120.0));
        assert!(!driver.stop_token().is_stop_requested());
    }

    #[test]
    fn test_start_and_stop_worker() {
        let (mut driver, receiver) = driver();
        driver.reset();

        let running = driver.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        let driver = running.stop().unwrap();

        let messages: Vec<_> = receiver.try_iter().collect();
        let tail = &messages[messages.len() - 2..];
        assert!(matches!(tail[0], SimulationMessage::Counters(_)));
        assert_eq!(tail[1], SimulationMessage::Stopped { step: driver.world().step_count() });

        let deltas: Vec<DeltaMessage> = messages
            .into_iter()
            .filter_map(|m| match m {
                SimulationMessage::Delta(delta) => Some(delta),
                _ => None,
            })
            .collect();
        assert!(deltas.windows(2).all(|w| w[0].step < w[1].step));
    }
}
