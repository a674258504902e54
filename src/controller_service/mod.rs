//! Controller service (C5): a single-threaded, cooperative UDP endpoint that
//! ingests sensor samples, dispatches them to user compute, and emits
//! replies, recording per-request timing.
//!
//! Grounded on `examples/original_source/cleave/base/network/backend.py`
//! (`UDPControllerService::datagramReceived`, the `result_callback` closure,
//! and the `task.LoopingCall(self._control.process_loop)` driver) and on
//! the `component_b/receiver.rs` dispatch style. The real
//! `tokio::net::UdpSocket` construction follows the `socket2` → `from_std`
//! idiom used in `examples/other_examples/2259cc45_open-telemetry-otel-arrow__rust-otap-dataflow-crates-engine-src-effect_handler.rs.rs`
//! (this module never opened a real socket before; its Cargo.toml already
//! carries `tokio` with the `full` feature set and `socket2` for exactly
//! this purpose).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;

use crate::codec::{parse_message_from_bytes, ControlMessage, MsgType, Ppm, MAX_DATAGRAM_SIZE};
use crate::recording::{NamedRecordable, Recorder, Value};

/// User compute collaborator: receives sensor input, eventually calls back
/// with an actuation command (at most once per `submit_request`).
pub trait Controller: Send {
    /// Submits sensor input for processing. `callback` may run synchronously
    /// within this call, or be deferred — but if it runs, it must run on the
    /// service's event-loop context.
    fn submit_request(&mut self, control_input: Ppm, callback: ResultCallback);

    /// Invoked on every service tick; must be non-blocking.
    fn process_loop(&mut self) {}
}

/// A boxed, single-shot continuation the service calls at most once.
pub type ResultCallback = Box<dyn FnOnce(Ppm) + Send>;

/// UDP datagram endpoint driving the per-cycle request/reply protocol.
pub struct ControllerService<C: Controller> {
    socket: UdpSocket,
    controller: AsyncMutex<C>,
    records: Arc<NamedRecordable>,
    running: Arc<AtomicBool>,
}

impl<C: Controller + 'static> ControllerService<C> {
    /// Binds a UDP socket on `port` via the `socket2` → `UdpSocket::from_std`
    /// idiom (SO_REUSEADDR set, non-blocking, handed to tokio).
    pub async fn bind(port: u16, controller: C) -> std::io::Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let domain = socket2::Domain::for_address(addr);
        let sock = socket2::Socket::new(domain, socket2::Type::DGRAM, None)?;
        sock.set_reuse_address(true)?;
        sock.set_nonblocking(true)?;
        sock.bind(&addr.into())?;

        let socket = UdpSocket::from_std(sock.into())?;

        let records = Arc::new(NamedRecordable::new(
            "ControllerService",
            &[
                "seq",
                "recv_timestamp",
                "recv_size",
                "process_time",
                "send_timestamp",
                "send_size",
            ],
        ));

        Ok(Self {
            socket,
            controller: AsyncMutex::new(controller),
            records,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn attach_recorder(&self, recorder: Arc<dyn Recorder>) {
        self.records.attach(recorder);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("a bound socket always has a local address")
    }

    /// Runs until `stop()` is called from another task/thread sharing the
    /// same `running` flag, interleaving datagram receipt with
    /// `controller.process_loop()` ticks.
    pub async fn serve(self: Arc<Self>) {
        info!("starting controller service...");
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        while self.running.load(Ordering::Acquire) {
            tokio::select! {
                biased;

                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((n, addr)) => {
                            // Handled on its own task so a slow/deferred
                            // controller callback can never stall datagram
                            // reception or the process_loop tick below.
                            let datagram = buf[..n].to_vec();
                            let service = self.clone();
                            tokio::spawn(async move { service.handle_datagram(&datagram, addr).await });
                        }
                        Err(e) => warn!("udp recv error: {e}"),
                    }
                }

                _ = tokio::task::yield_now() => {
                    self.controller.lock().await.process_loop();
                }
            }
        }
        info!("controller service shutdown complete.");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    async fn handle_datagram(&self, dgram: &[u8], addr: SocketAddr) {
        let recv_time = crate::codec::monotonic_seconds();
        let in_size = dgram.len();
        debug!("received {in_size} bytes from {addr}");

        let in_msg = match parse_message_from_bytes(dgram) {
            Ok(None) => return,
            Ok(Some(msg)) => msg,
            Err(e) => {
                warn!("could not unpack datagram from {addr}: {e}");
                return;
            }
        };

        if in_msg.msg_type != MsgType::SensorSample {
            warn!("ignoring message of unrecognized type {:?}", in_msg.msg_type);
            return;
        }

        info!("got control request seq={}", in_msg.seq);

        // submit_request may invoke the callback synchronously or defer it;
        // either way this task (already off the main serve loop) just waits
        // on the oneshot for as long as it takes.
        let (tx, rx) = tokio::sync::oneshot::channel::<Ppm>();
        let callback: ResultCallback = Box::new(move |act_cmds| {
            let _ = tx.send(act_cmds);
        });

        self.controller.lock().await.submit_request(in_msg.payload.clone(), callback);

        if let Ok(act_cmds) = rx.await {
            self.send_reply(&in_msg, act_cmds, addr, recv_time, in_size).await;
        }
        // If the controller drops the request (the sender side of the
        // oneshot is dropped without sending), no reply is emitted and no
        // record is pushed.
    }

    async fn send_reply(
        &self,
        in_msg: &ControlMessage,
        act_cmds: Ppm,
        addr: SocketAddr,
        recv_time: f64,
        in_size: usize,
    ) {
        let out_msg = in_msg.make_control_reply(act_cmds);
        let out_dgram = match out_msg.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to serialize reply for seq={}: {e}", in_msg.seq);
                return;
            }
        };
        let out_size = out_dgram.len();

        if let Err(e) = self.socket.send_to(&out_dgram, addr).await {
            warn!("udp send error to {addr}: {e}");
            return;
        }
        debug!("sent command to {addr} ({out_size} bytes)");

        let mut fields = HashMap::new();
        fields.insert("seq".to_string(), Value::UInt(in_msg.seq));
        fields.insert("recv_timestamp".to_string(), Value::Float(recv_time));
        fields.insert("recv_size".to_string(), Value::UInt(in_size as u64));
        fields.insert(
            "process_time".to_string(),
            Value::Float(out_msg.timestamp - recv_time),
        );
        fields.insert("send_timestamp".to_string(), Value::Float(out_msg.timestamp));
        fields.insert("send_size".to_string(), Value::UInt(out_size as u64));

        if let Err(e) = self.records.push_record(fields) {
            warn!("failed to push controller service record: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ControlMessage;
    use std::sync::Mutex;

    /// Echoes the incoming payload doubled, synchronously.
    struct EchoController;
    impl Controller for EchoController {
        fn submit_request(&mut self, control_input: Ppm, callback: ResultCallback) {
            let mut out = Ppm::new();
            for (k, v) in control_input {
                out.insert(k, v * 2.0);
            }
            callback(out);
        }
    }

    struct CollectingRecorder {
        rows: Mutex<Vec<crate::recording::Record>>,
    }
    impl Recorder for CollectingRecorder {
        fn notify(&self, record: &crate::recording::Record) {
            self.rows.lock().unwrap().push(record.clone());
        }
    }

    #[tokio::test]
    async fn roundtrip_sensor_sample_yields_tagged_reply_and_record() {
        let service = Arc::new(ControllerService::bind(0, EchoController).await.unwrap());
        let local_addr = service.socket.local_addr().unwrap();
        let recorder = Arc::new(CollectingRecorder { rows: Mutex::new(Vec::new()) });
        service.attach_recorder(recorder.clone());

        let serve_handle = {
            let service = service.clone();
            tokio::spawn(async move { service.serve().await })
        };

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut payload = Ppm::new();
        payload.insert("x".to_string(), 1.5);
        let req = ControlMessage::sensor_sample(42, 0.0, payload);
        let bytes = req.serialize().unwrap();
        client.send_to(&bytes, local_addr).await.unwrap();

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (n, _) = tokio::time::timeout(std::time::Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();

        let reply = parse_message_from_bytes(&buf[..n]).unwrap().unwrap();
        assert_eq!(reply.msg_type, MsgType::ControlCommand);
        assert_eq!(reply.seq, 42);
        assert_eq!(reply.payload.get("x"), Some(&3.0));

        // Give the record a moment to land (push happens right after send).
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        service.stop();
        let _ = serve_handle.await;

        let rows = recorder.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("seq"), Some(&Value::UInt(42)));
    }

    #[tokio::test]
    async fn malformed_datagram_produces_no_reply_and_no_record() {
        let service = Arc::new(ControllerService::bind(0, EchoController).await.unwrap());
        let local_addr = service.socket.local_addr().unwrap();
        let recorder = Arc::new(CollectingRecorder { rows: Mutex::new(Vec::new()) });
        service.attach_recorder(recorder.clone());

        let serve_handle = {
            let service = service.clone();
            tokio::spawn(async move { service.serve().await })
        };

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[0xFFu8, 0xFF, 0xFF], local_addr).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let no_reply = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            client.recv_from(&mut buf),
        )
        .await;
        assert!(no_reply.is_err(), "expected no reply datagram");

        service.stop();
        let _ = serve_handle.await;
        assert!(recorder.rows.lock().unwrap().is_empty());
    }
}
