//! A networked-control-system testbed: a periodic plant simulation loop
//! talking MessagePack-over-UDP to an external controller process, with
//! timing and state recorded to CSV for offline analysis.

pub mod codec;
pub mod config;
pub mod controller_service;
pub mod plant;
pub mod recording;
pub mod scheduler;

pub use codec::{ControlMessage, MsgType, Ppm};
pub use controller_service::{Controller, ControllerService, ResultCallback};
pub use plant::{Actuator, Plant, Sensor, State};
pub use recording::{NamedRecordable, Recorder, Recordable};
