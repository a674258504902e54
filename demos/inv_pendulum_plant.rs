//! Inverted-pendulum plant demo: wires a concrete nonlinear cart-pole
//! `State` to a dedicated UDP client, exchanging sensor samples and
//! actuation commands with a controller service, recording plant state
//! to CSV.
//!
//! Wiring (construct state, sensor, actuator, hand them to `Plant`, call
//! `start`) follows `examples/original_source/examples/inv_pend.py`. That
//! file never supplies the cart-pole dynamics themselves (its `InvPendulumState`
//! lives in an `impl` module outside the retrieved source); the equations
//! below are the standard nonlinear cart-pole model, authored independently.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};

use ncs_testbed::codec::{parse_message_from_bytes, ControlMessage, MsgType, Ppm, MAX_DATAGRAM_SIZE};
use ncs_testbed::plant::{ActuatorError, SensorError, StateAdvanceError};
use ncs_testbed::recording::{CsvRecorder, NamedRecordable};
use ncs_testbed::{record_fields, Actuator, Plant, Sensor, State};

const GRAVITY: f64 = 9.8;
const CART_MASS: f64 = 1.0;
const POLE_MASS: f64 = 0.1;
const POLE_HALF_LENGTH: f64 = 0.5;
const TOTAL_MASS: f64 = CART_MASS + POLE_MASS;

#[derive(Parser, Debug)]
#[command(about = "Runs an inverted-pendulum plant against a UDP controller")]
struct Args {
    /// Controller address to send sensor samples to and receive actuation from.
    #[arg(long, default_value = "127.0.0.1:9999")]
    controller_addr: String,

    /// Simulation step period in microseconds.
    #[arg(long, default_value_t = 10_000)]
    step_period_us: u64,

    /// Initial pole angle, in radians, measured from vertical.
    #[arg(long, default_value_t = 0.05)]
    initial_angle: f64,

    /// CSV path plant state samples are recorded to.
    #[arg(long, default_value = "pendulum_state.csv")]
    record_to: String,
}

/// Classic nonlinear cart-pole dynamics, integrated with semi-implicit
/// Euler steps. The actuation's `force` field is a horizontal force on the
/// cart; the sample exposes `position`, `velocity`, `angle`, and
/// `angular_velocity`.
#[derive(Debug, Clone, Copy)]
struct InvPendulumState {
    position: f64,
    velocity: f64,
    angle: f64,
    angular_velocity: f64,
}

impl InvPendulumState {
    fn new(initial_angle: f64) -> Self {
        Self { position: 0.0, velocity: 0.0, angle: initial_angle, angular_velocity: 0.0 }
    }
}

impl State for InvPendulumState {
    fn advance(&mut self, dt_ns: u64, actuation: Option<&Ppm>) -> Result<Ppm, StateAdvanceError> {
        let dt = dt_ns as f64 / 1_000_000_000.0;
        let force = actuation.and_then(|a| a.get("force")).copied().unwrap_or(0.0);

        let cos_theta = self.angle.cos();
        let sin_theta = self.angle.sin();

        let temp = (force + POLE_MASS * POLE_HALF_LENGTH * self.angular_velocity.powi(2) * sin_theta)
            / TOTAL_MASS;
        let angular_accel = (GRAVITY * sin_theta - cos_theta * temp)
            / (POLE_HALF_LENGTH * (4.0 / 3.0 - POLE_MASS * cos_theta.powi(2) / TOTAL_MASS));
        let linear_accel = temp - POLE_MASS * POLE_HALF_LENGTH * angular_accel * cos_theta / TOTAL_MASS;

        self.velocity += linear_accel * dt;
        self.position += self.velocity * dt;
        self.angular_velocity += angular_accel * dt;
        self.angle += self.angular_velocity * dt;

        if !self.angle.is_finite() || !self.position.is_finite() {
            return Err(StateAdvanceError("pendulum state diverged to a non-finite value".into()));
        }

        let mut sample = Ppm::new();
        sample.insert("position".to_string(), self.position);
        sample.insert("velocity".to_string(), self.velocity);
        sample.insert("angle".to_string(), self.angle);
        sample.insert("angular_velocity".to_string(), self.angular_velocity);
        Ok(sample)
    }
}

/// Sends each plant sample to the controller as a `SENSOR_SAMPLE` datagram.
struct UdpSensor {
    socket: Arc<UdpSocket>,
    seq: AtomicU64,
}

impl Sensor for UdpSensor {
    fn set_sample(&mut self, sample: Ppm) -> Result<(), SensorError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let msg = ControlMessage::sensor_sample(seq, ncs_testbed::codec::monotonic_seconds(), sample);
        let bytes = msg.serialize().map_err(|e| SensorError(e.to_string()))?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(SensorError("encoded sample exceeds the datagram size budget".to_string()));
        }
        self.socket.send(&bytes).map_err(|e| SensorError(e.to_string()))?;
        Ok(())
    }
}

/// Polls the socket (non-blocking) for the latest `CONTROL_COMMAND` reply;
/// stale or absent replies simply mean no actuation is applied this step.
struct UdpActuator {
    socket: Arc<UdpSocket>,
}

impl Actuator for UdpActuator {
    fn get_next_actuation(&mut self) -> Result<Option<Ppm>, ActuatorError> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        match self.socket.recv(&mut buf) {
            Ok(n) => match parse_message_from_bytes(&buf[..n]) {
                Ok(Some(msg)) if msg.msg_type == MsgType::ControlCommand => Ok(Some(msg.payload)),
                Ok(Some(_)) | Ok(None) => Ok(None),
                Err(e) => {
                    warn!("dropping malformed actuation datagram: {e}");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(ActuatorError(e.to_string())),
        }
    }
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(&args.controller_addr)?;
    socket.set_nonblocking(true)?;
    let socket = Arc::new(socket);

    let sensor = UdpSensor { socket: socket.clone(), seq: AtomicU64::new(0) };
    let actuator = UdpActuator { socket };
    let state = InvPendulumState::new(args.initial_angle);

    let plant = Arc::new(Plant::new(args.step_period_us * 1_000, state, sensor, actuator));

    let records = Arc::new(NamedRecordable::new(
        "pendulum_state",
        &["position", "velocity", "angle", "angular_velocity"],
    ));
    let recorder = Arc::new(
        CsvRecorder::new(
            &args.record_to,
            vec!["position".into(), "velocity".into(), "angle".into(), "angular_velocity".into()],
        )
        .expect("recording path must not be a directory"),
    );
    records.attach(recorder.clone());

    {
        let plant = plant.clone();
        let records = records.clone();
        plant.hook_end_of_step(move || {
            let sample = plant.sample_state();
            let fields = record_fields! {
                "position" => sample.position,
                "velocity" => sample.velocity,
                "angle" => sample.angle,
                "angular_velocity" => sample.angular_velocity,
            };
            if let Err(e) = records.push_record(fields) {
                warn!("failed to record pendulum state: {e}");
            }
        });
    }

    info!(
        "starting pendulum plant, step period {}us, controller {}",
        args.step_period_us, args.controller_addr
    );
    plant.start();

    ctrlc_blocking();
    plant.shutdown();
    records.shutdown();
    Ok(())
}

/// Blocks the calling thread until a line is read from stdin, standing in
/// for a SIGINT handler (this binary's plant loop runs on plain OS threads,
/// not a tokio runtime, so `tokio::signal::ctrl_c` is unavailable here).
fn ctrlc_blocking() {
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}
