//! Recordable/Recorder substrate (C2).
//!
//! A [`Recordable`] owns a fixed record schema and a set of attached
//! [`Recorder`]s; `push_record` fans out notifications in push order.
//! Grounded on `examples/original_source/cleave/base/stats/recordable.py`
//! (`NamedRecordable`, `CSVRecorder`) and on the existing lock-free
//! producer/consumer split in `component_a/sync_manager.rs`
//! (`SyncManager::start_log_consumer`), generalized from ad-hoc diagnostic
//! counters to typed, push-ordered records.

mod csv_recorder;

pub use csv_recorder::CsvRecorder;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A single pushed record: the field values in schema order, by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Arc<Vec<String>>,
    values: Vec<Value>,
}

/// A record field value. Kept narrow — records are scalars, matching the
/// numeric/string telemetry fields `CSVRecorder` serializes in the source.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl Record {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .position(|f| f == name)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Programmer error: `push_record` missing a required field or carrying an
/// unknown one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    MissingField(String),
    UnknownField(String),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::MissingField(name) => write!(f, "missing required field `{name}`"),
            SchemaError::UnknownField(name) => write!(f, "unknown field `{name}`"),
        }
    }
}

impl std::error::Error for SchemaError {}

/// Consumes records pushed to a `Recordable` in push order.
///
/// Lifecycle: `initialize` runs before the first `notify`; `notify` runs
/// once per push, in push order, for a given `Recordable`; `flush` may run
/// concurrently with `notify`; `shutdown` blocks until all buffered data is
/// durable and no `notify` follows it.
pub trait Recorder: Send + Sync {
    fn initialize(&self) {}
    fn notify(&self, record: &Record);
    fn flush(&self) {}
    fn shutdown(&self) {}
}

/// Owns a fixed record schema and the set of recorders attached to it.
pub trait Recordable {
    fn record_fields(&self) -> &[String];
}

/// A `Recordable` built from a field list plus an optional defaults map,
/// matching `NamedRecordable` in the source.
pub struct NamedRecordable {
    name: String,
    fields: Arc<Vec<String>>,
    defaults: HashMap<String, Value>,
    recorders: Mutex<Vec<Arc<dyn Recorder>>>,
}

impl NamedRecordable {
    pub fn new(name: impl Into<String>, required_fields: &[&str]) -> Self {
        Self::with_defaults(name, required_fields, HashMap::new())
    }

    pub fn with_defaults(
        name: impl Into<String>,
        required_fields: &[&str],
        defaults: HashMap<String, Value>,
    ) -> Self {
        let mut fields: Vec<String> = required_fields.iter().map(|f| f.to_string()).collect();
        for key in defaults.keys() {
            if !fields.contains(key) {
                fields.push(key.clone());
            }
        }
        Self {
            name: name.into(),
            fields: Arc::new(fields),
            defaults,
            recorders: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches a recorder, calling `initialize` before it can observe any
    /// pushes.
    pub fn attach(&self, recorder: Arc<dyn Recorder>) {
        recorder.initialize();
        self.recorders.lock().unwrap_or_else(|e| e.into_inner()).push(recorder);
    }

    pub fn recorders(&self) -> Vec<Arc<dyn Recorder>> {
        self.recorders.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Validates `kwargs` against the schema, fills in defaults for any
    /// omitted optional field, and notifies every attached recorder in push
    /// order.
    pub fn push_record(&self, kwargs: HashMap<String, Value>) -> Result<(), SchemaError> {
        for key in kwargs.keys() {
            if !self.fields.contains(key) {
                return Err(SchemaError::UnknownField(key.clone()));
            }
        }

        let mut values = Vec::with_capacity(self.fields.len());
        for field in self.fields.iter() {
            let value = match kwargs.get(field) {
                Some(v) => v.clone(),
                None => match self.defaults.get(field) {
                    Some(v) => v.clone(),
                    None => return Err(SchemaError::MissingField(field.clone())),
                },
            };
            values.push(value);
        }

        let record = Record { fields: self.fields.clone(), values };
        for recorder in self.recorders().iter() {
            recorder.notify(&record);
        }
        Ok(())
    }

    /// Blocks until every attached recorder has durably flushed.
    pub fn shutdown(&self) {
        for recorder in self.recorders().iter() {
            recorder.shutdown();
        }
    }
}

impl Recordable for NamedRecordable {
    fn record_fields(&self) -> &[String] {
        &self.fields
    }
}

/// Convenience macro-free builder for push_record call sites.
#[macro_export]
macro_rules! record_fields {
    ($($key:expr => $val:expr),* $(,)?) => {{
        let mut m = std::collections::HashMap::new();
        $(m.insert($key.to_string(), $crate::recording::Value::from($val));)*
        m
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRecorder {
        seen: Mutex<Vec<Record>>,
    }

    impl Recorder for CountingRecorder {
        fn notify(&self, record: &Record) {
            self.seen.lock().unwrap().push(record.clone());
        }
    }

    #[test]
    fn push_record_requires_all_required_fields() {
        let rec = NamedRecordable::new("test", &["a", "b"]);
        let err = rec
            .push_record(record_fields! { "a" => 1.0_f64 })
            .unwrap_err();
        assert_eq!(err, SchemaError::MissingField("b".to_string()));
    }

    #[test]
    fn push_record_rejects_unknown_fields() {
        let rec = NamedRecordable::new("test", &["a"]);
        let err = rec
            .push_record(record_fields! { "a" => 1.0_f64, "z" => 2.0_f64 })
            .unwrap_err();
        assert_eq!(err, SchemaError::UnknownField("z".to_string()));
    }

    #[test]
    fn optional_fields_fall_back_to_defaults() {
        let mut defaults = HashMap::new();
        defaults.insert("b".to_string(), Value::Float(9.0));
        let rec = NamedRecordable::with_defaults("test", &["a"], defaults);

        rec.push_record(record_fields! { "a" => 1.0_f64 }).unwrap();
        let recorder = Arc::new(CountingRecorder { seen: Mutex::new(Vec::new()) });
        rec.attach(recorder.clone());
        rec.push_record(record_fields! { "a" => 2.0_f64 }).unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].value("b"), Some(&Value::Float(9.0)));
    }

    #[test]
    fn recorders_observe_push_order() {
        let rec = NamedRecordable::new("test", &["seq"]);
        let order = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        struct OrderRecorder {
            order: Arc<Mutex<Vec<u64>>>,
        }
        impl Recorder for OrderRecorder {
            fn notify(&self, record: &Record) {
                if let Some(Value::UInt(v)) = record.value("seq") {
                    self.order.lock().unwrap().push(*v);
                }
            }
        }

        rec.attach(Arc::new(OrderRecorder { order: order.clone() }));
        for seq in 0..5u64 {
            rec.push_record(record_fields! { "seq" => seq }).unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
