//! Control-message codec (C1).
//!
//! Wire format is a self-describing MessagePack map with four required keys
//! (`type`, `seq`, `timestamp`, `payload`), one message per UDP datagram.
//! Grounded on `examples/original_source/cleave/base/network/backend.py`
//! (`ControlMessageFactory`, `parse_message_from_bytes`) and serialized with
//! `rmp-serde`, the MessagePack binding already used elsewhere in this pack
//! (`examples/blt-lading/src/payload/trace_agent.rs`). Inbound bytes are
//! peeked as a generic `rmpv::Value` before the typed decode, so an
//! empty-map datagram can be told apart from a real message whose fields
//! merely happen to be zero-valued; `rmpv` is the companion crate the
//! msgpack-rust ecosystem pairs with `rmp-serde` for exactly this.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Maximum datagram size a sender should ever produce (IPv4 MTU-safe).
pub const MAX_DATAGRAM_SIZE: usize = 1472;

/// Physical Property Mapping: an unordered map from short names to scalars.
pub type Ppm = HashMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgType {
    SensorSample,
    ControlCommand,
    /// Any tag this build doesn't recognize; receivers log and ignore it.
    Unknown(u8),
}

impl MsgType {
    fn to_tag(self) -> u8 {
        match self {
            MsgType::SensorSample => 1,
            MsgType::ControlCommand => 2,
            MsgType::Unknown(tag) => tag,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => MsgType::SensorSample,
            2 => MsgType::ControlCommand,
            other => MsgType::Unknown(other),
        }
    }
}

/// On-wire representation: a plain map so unknown top-level keys are ignored
/// by construction (serde just never looks at them).
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    msg_type: u8,
    seq: u64,
    timestamp: f64,
    payload: Ppm,
}

/// A tagged control-plane envelope (sensor sample or control command).
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub msg_type: MsgType,
    pub seq: u64,
    pub timestamp: f64,
    pub payload: Ppm,
}

impl ControlMessage {
    pub fn sensor_sample(seq: u64, timestamp: f64, payload: Ppm) -> Self {
        Self { msg_type: MsgType::SensorSample, seq, timestamp, payload }
    }

    /// Builds a `CONTROL_COMMAND` reply: `seq` is copied from this message,
    /// `timestamp` is fresh (the reply's own construction time).
    pub fn make_control_reply(&self, payload: Ppm) -> Self {
        Self {
            msg_type: MsgType::ControlCommand,
            seq: self.seq,
            timestamp: monotonic_seconds(),
            payload,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        let wire = WireMessage {
            msg_type: self.msg_type.to_tag(),
            seq: self.seq,
            timestamp: self.timestamp,
            payload: self.payload.clone(),
        };
        rmp_serde::to_vec_named(&wire).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

/// Errors surfaced while decoding a datagram. An empty or empty-content
/// datagram is not an error — see [`parse_message_from_bytes`], which
/// returns `Ok(None)` for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Malformed(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Malformed(msg) => write!(f, "malformed control message: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Parses a datagram into a control message.
///
/// `Ok(None)` is the distinguished "no message" sentinel for an empty
/// datagram or an empty encoded map — callers must not treat this as an
/// error. `Err(CodecError::Malformed)` covers anything else that fails to
/// decode or violates the required-key schema.
pub fn parse_message_from_bytes(bytes: &[u8]) -> Result<Option<ControlMessage>, CodecError> {
    if bytes.is_empty() {
        return Ok(None);
    }

    // Peek at the structure as a generic value first: a map with zero keys
    // is the "no message" sentinel, and telling that apart from a genuine
    // `SENSOR_SAMPLE` with seq=0 and an empty payload requires looking at
    // key count, not at any individual field's value.
    let peek: rmpv::Value = match rmp_serde::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => return Err(CodecError::Malformed(e.to_string())),
    };
    match peek.as_map() {
        Some(entries) if entries.is_empty() => return Ok(None),
        Some(_) => {}
        None => return Err(CodecError::Malformed("top-level value is not a map".to_string())),
    }

    let wire: WireMessage = match rmp_serde::from_slice(bytes) {
        Ok(w) => w,
        Err(e) => return Err(CodecError::Malformed(e.to_string())),
    };

    Ok(Some(ControlMessage {
        msg_type: MsgType::from_tag(wire.msg_type),
        seq: wire.seq,
        timestamp: wire.timestamp,
        payload: wire.payload,
    }))
}

/// Monotonic-frame timestamp in seconds, used by message originators.
/// Each side timestamps in its own frame (no clock
/// synchronization between plant and controller).
///
/// Built from `Instant`, not `SystemTime`: a wall clock can step backward
/// under NTP/manual adjustment, which would let two timestamps taken in
/// process order compare out of order (and a `process_time` computed from
/// them go negative). `Instant` has no wire-serializable epoch, so the
/// first call in a process fixes a wall-clock origin once and every
/// subsequent call reports elapsed monotonic time added to that origin —
/// the result is on the same numeric scale as Unix seconds but can never
/// move backward within one process.
pub fn monotonic_seconds() -> f64 {
    static ORIGIN: OnceLock<(Instant, f64)> = OnceLock::new();
    let (epoch_instant, epoch_wall) = *ORIGIN.get_or_init(|| {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        (Instant::now(), wall)
    });
    epoch_wall + epoch_instant.elapsed().as_secs_f64()
}
