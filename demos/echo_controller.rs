//! Example controller binary: a toy proportional controller wired into
//! `ControllerService`, recording per-request timing to CSV.
//!
//! Grounded on `examples/original_source/cleave/base/network/backend.py`'s
//! `__main__` wiring (construct a controller, build the service around it,
//! run the reactor) and on the CLI-flag entry-point style of `main.rs`.

use std::sync::Arc;

use clap::Parser;
use log::info;

use ncs_testbed::codec::Ppm;
use ncs_testbed::{Controller, ControllerService, ResultCallback};

#[derive(Parser, Debug)]
#[command(about = "Runs a toy proportional controller over UDP")]
struct Args {
    /// UDP port to listen on.
    #[arg(long, default_value_t = 9999)]
    port: u16,

    /// Proportional gain applied to every numeric input field.
    #[arg(long, default_value_t = -10.0)]
    gain: f64,

    /// CSV path for per-request timing records; omit to skip recording.
    #[arg(long)]
    record_to: Option<String>,
}

/// Multiplies every field in the sample by a fixed gain and replies
/// immediately; a stand-in for whatever real control law a user supplies.
struct ProportionalController {
    gain: f64,
}

impl Controller for ProportionalController {
    fn submit_request(&mut self, control_input: Ppm, callback: ResultCallback) {
        let mut actuation = Ppm::new();
        for (key, value) in control_input {
            actuation.insert(key, value * self.gain);
        }
        callback(actuation);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let controller = ProportionalController { gain: args.gain };
    let service = Arc::new(ControllerService::bind(args.port, controller).await?);

    if let Some(path) = args.record_to {
        let recorder = ncs_testbed::recording::CsvRecorder::new(
            path,
            vec![
                "seq".into(),
                "recv_timestamp".into(),
                "recv_size".into(),
                "process_time".into(),
                "send_timestamp".into(),
                "send_size".into(),
            ],
        )
        .expect("recording path must not be a directory");
        service.attach_recorder(Arc::new(recorder));
    }

    info!("controller listening on port {}", args.port);

    let serve_handle = {
        let service = service.clone();
        tokio::spawn(async move { service.serve().await })
    };

    let _ = tokio::signal::ctrl_c().await;
    service.stop();
    let _ = serve_handle.await;

    Ok(())
}
