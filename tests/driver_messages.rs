use cell_common::{SimulationConfig, SimulationMessage, Vec2};
use cell_engine::{LoopState, SimulationDriver};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const CONFIG: &str = r#"
    [universe]
    width = 300.0
    height = 300.0

    [timing]
    physics_dt_s = 0.001
    time_scale = 2.0
    frame_interval_s = 0.01
    counter_interval_s = 0.02
    max_steps_per_iteration = 50

    [initial_conditions]
    seed = 3
    distribution = { A = 40, B = 40 }

    [[disc_types]]
    name = "A"
    color = "magenta"
    radius = 4.0
    mass = 1.0

    [[disc_types]]
    name = "B"
    color = "white"
    radius = 6.0
    mass = 2.0

    [[reactions]]
    reactants = ["A", "B"]
    products = ["B"]
    probability = 0.5

    [[reactions]]
    reactants = ["B"]
    products = ["A", "A"]
    probability = 0.5
"#;

#[test]
fn test_worker_stream_keeps_mirror_consistent() {
    let config = SimulationConfig::from_toml_str(CONFIG).unwrap();
    let (sender, receiver) = mpsc::channel();
    let mut driver = SimulationDriver::from_config(&config, sender).unwrap();
    driver.reset();

    let running = driver.start().unwrap();
    thread::sleep(Duration::from_millis(150));
    let driver = running.stop().unwrap();
    assert!(driver.failure().is_none());

    let mut mirror: Vec<Vec2> = Vec::new();
    let mut frames = 0;
    let mut stopped = None;
    for message in receiver.try_iter() {
        assert!(stopped.is_none(), "message after Stopped: {:?}", message);
        match message {
            SimulationMessage::Scene(scene) => mirror = scene.discs.iter().map(|d| d.position).collect(),
            SimulationMessage::Delta(delta) => delta.apply(&mut mirror, |d| d.position, |_, _| {}),
            SimulationMessage::Frame(frame) => {
                frames += 1;
                assert_eq!(frame.positions.len(), mirror.len(), "frame at step {}", frame.step);
                mirror = frame.positions.into_iter().map(|(_, p)| p).collect();
            }
            SimulationMessage::Stopped { step } => stopped = Some(step),
            SimulationMessage::Counters(_) => {}
            SimulationMessage::Failed(reason) => panic!("run failed: {}", reason),
        }
    }

    assert!(frames >= 1);
    assert_eq!(stopped, Some(driver.world().step_count()));
    assert_eq!(mirror.len(), driver.world().discs().len());
}

#[test]
fn test_stopped_driver_can_restart_after_reset() {
    let config = SimulationConfig::from_toml_str(CONFIG).unwrap();
    let (sender, receiver) = mpsc::channel();
    let mut driver = SimulationDriver::from_config(&config, sender).unwrap();
    driver.reset();

    let mut driver = driver.start().unwrap().stop().unwrap();
    let first_run: Vec<_> = receiver.try_iter().collect();
    assert!(matches!(first_run.last(), Some(SimulationMessage::Stopped { .. })));

    driver.reset();
    assert_eq!(driver.world().step_count(), 0);
    assert_eq!(driver.advance(Duration::from_millis(5)).unwrap(), LoopState::Running);
    assert!(driver.world().step_count() > 0);
}

#[test]
fn test_counters_are_drained_on_stop() {
    let config = SimulationConfig::from_toml_str(CONFIG).unwrap();
    let (sender, receiver) = mpsc::channel();
    let mut driver = SimulationDriver::from_config(&config, sender).unwrap();
    driver.reset();

    let running = driver.start().unwrap();
    thread::sleep(Duration::from_millis(60));
    let mut driver = running.stop().unwrap();

    let messages: Vec<_> = receiver.try_iter().collect();
    assert!(matches!(messages[messages.len() - 2], SimulationMessage::Counters(_)));
    assert_eq!(driver.advance(Duration::ZERO).unwrap(), LoopState::Running);
    assert!(receiver.try_iter().next().is_none());
}
