//! End-to-end exercise of the controller service's UDP protocol: a real
//! client socket plays the role of a plant's sensor/actuator pair.
//!
//! Grounded on the same request/reply cycle as
//! `examples/original_source/cleave/base/network/backend.py::UDPControllerService`,
//! driven here through the crate's public surface rather than in-module
//! unit tests, matching the split between unit tests colocated in `src/`
//! and scenario-level tests under a top-level `tests/` directory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use ncs_testbed::codec::{parse_message_from_bytes, ControlMessage, MsgType, Ppm, MAX_DATAGRAM_SIZE};
use ncs_testbed::{Controller, ControllerService, ResultCallback};

struct SumController {
    calls: AtomicU64,
}

impl Controller for SumController {
    fn submit_request(&mut self, control_input: Ppm, callback: ResultCallback) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let total: f64 = control_input.values().sum();
        let mut out = Ppm::new();
        out.insert("total".to_string(), total);
        callback(out);
    }
}

async fn spawn_service() -> (Arc<ControllerService<SumController>>, std::net::SocketAddr) {
    let service = Arc::new(
        ControllerService::bind(0, SumController { calls: AtomicU64::new(0) })
            .await
            .expect("bind should succeed on an ephemeral port"),
    );
    let addr = service.local_addr();
    let handle = service.clone();
    tokio::spawn(async move { handle.serve().await });
    (service, addr)
}

#[tokio::test]
async fn sensor_sample_roundtrip_produces_tagged_control_command() {
    let (service, addr) = spawn_service().await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut payload = Ppm::new();
    payload.insert("a".to_string(), 1.0);
    payload.insert("b".to_string(), 2.5);
    let request = ControlMessage::sensor_sample(10, 0.0, payload);
    client.send_to(&request.serialize().unwrap(), addr).await.unwrap();

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    let (n, _) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
        .await
        .expect("reply should arrive within the timeout")
        .unwrap();

    let reply = parse_message_from_bytes(&buf[..n]).unwrap().unwrap();
    assert_eq!(reply.msg_type, MsgType::ControlCommand);
    assert_eq!(reply.seq, 10);
    assert_eq!(reply.payload.get("total"), Some(&3.5));

    service.stop();
}

#[tokio::test]
async fn unrecognized_message_type_is_dropped_without_a_reply() {
    let (service, addr) = spawn_service().await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // A structurally valid envelope whose type tag isn't SENSOR_SAMPLE must
    // be ignored rather than dispatched to the controller.
    let mut payload = Ppm::new();
    payload.insert("x".to_string(), 9.0);
    let bogus = ControlMessage::sensor_sample(1, 0.0, payload).make_control_reply(Ppm::new());
    client.send_to(&bogus.serialize().unwrap(), addr).await.unwrap();

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    let result = timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
    assert!(result.is_err(), "controller must not reply to a non-sample message");

    service.stop();
}

#[tokio::test]
async fn malformed_datagram_does_not_crash_the_service() {
    let (service, addr) = spawn_service().await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    client.send_to(&[0xDE, 0xAD, 0xBE, 0xEF], addr).await.unwrap();

    // The service should still answer a well-formed follow-up request.
    let mut payload = Ppm::new();
    payload.insert("a".to_string(), 4.0);
    let request = ControlMessage::sensor_sample(2, 0.0, payload);
    client.send_to(&request.serialize().unwrap(), addr).await.unwrap();

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    let (n, _) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
        .await
        .expect("service should keep serving after a malformed datagram")
        .unwrap();
    let reply = parse_message_from_bytes(&buf[..n]).unwrap().unwrap();
    assert_eq!(reply.seq, 2);

    service.stop();
}
