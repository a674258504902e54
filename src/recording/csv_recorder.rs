//! CSV recorder: buffers pushed records into fixed-size chunks and hands
//! each filled chunk to a background writer task, so `notify` never blocks
//! on disk I/O.
//!
//! Grounded on `examples/original_source/cleave/base/stats/recordable.py`
//! (`CSVRecorder`: preallocated chunk table, header only on chunk 0,
//! `initialize` truncates the file, `shutdown` joins the final flush) and on
//! the existing `component_a/sync_manager.rs` LockFree consumer thread
//! (bounded hand-off queue, background thread draining to a `csv::Writer`).

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Sender};
use log::{error, warn};

use super::{Record, Recorder, Value};

/// Fatal at recorder construction: the output path exists and is a
/// directory.
#[derive(Debug)]
pub struct PathIsDirectory(PathBuf);

impl fmt::Display for PathIsDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} exists and is a directory", self.0.display())
    }
}
impl std::error::Error for PathIsDirectory {}

const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Registry of per-path mutexes so two recorders writing the same file never
/// interleave rows: a per-path mutex serializes concurrent writers.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap_or_else(|e| e.into_inner());
    map.entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

enum WriterMsg {
    Chunk { rows: Vec<Vec<Value>>, chunk_index: usize },
    Shutdown,
}

pub struct CsvRecorder {
    path: PathBuf,
    fields: Vec<String>,
    chunk_size: usize,
    buffer: Mutex<Vec<Vec<Value>>>,
    chunk_count: Mutex<usize>,
    tx: Sender<WriterMsg>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CsvRecorder {
    pub fn new(
        path: impl Into<PathBuf>,
        fields: Vec<String>,
    ) -> Result<Self, PathIsDirectory> {
        Self::with_chunk_size(path, fields, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(
        path: impl Into<PathBuf>,
        fields: Vec<String>,
        chunk_size: usize,
    ) -> Result<Self, PathIsDirectory> {
        let path = path.into();

        if path.exists() {
            if path.is_dir() {
                return Err(PathIsDirectory(path));
            }
            warn!("{} will be overwritten with new data.", path.display());
        }

        let lock = path_lock(&path);
        let (tx, rx) = bounded::<WriterMsg>(16);
        let writer_path = path.clone();
        let writer_fields = fields.clone();

        let writer_handle = thread::spawn(move || {
            run_writer(writer_path, writer_fields, lock, rx);
        });

        Ok(Self {
            path,
            fields,
            chunk_size: chunk_size.max(1),
            buffer: Mutex::new(Vec::with_capacity(chunk_size)),
            chunk_count: Mutex::new(0),
            tx,
            writer_handle: Mutex::new(Some(writer_handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn swap_and_send(&self, buffer: &mut Vec<Vec<Value>>) {
        if buffer.is_empty() {
            return;
        }
        let filled = std::mem::replace(buffer, Vec::with_capacity(self.chunk_size));
        let mut count = self.chunk_count.lock().unwrap_or_else(|e| e.into_inner());
        let chunk_index = *count;
        *count += 1;
        drop(count);

        if self.tx.send(WriterMsg::Chunk { rows: filled, chunk_index }).is_err() {
            error!("csv recorder writer thread for {} is gone", self.path.display());
        }
    }
}

impl Recorder for CsvRecorder {
    fn initialize(&self) {
        // "Touch" the file to truncate it ahead of the first append.
        if let Err(e) = File::create(&self.path) {
            error!("failed to truncate {}: {e}", self.path.display());
        }
    }

    fn notify(&self, record: &Record) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(record.values().to_vec());
        if buffer.len() >= self.chunk_size {
            self.swap_and_send(&mut buffer);
        }
    }

    fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        self.swap_and_send(&mut buffer);
    }

    fn shutdown(&self) {
        self.flush();
        let _ = self.tx.send(WriterMsg::Shutdown);
        if let Some(handle) = self.writer_handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

fn run_writer(
    path: PathBuf,
    fields: Vec<String>,
    path_lock: Arc<Mutex<()>>,
    rx: crossbeam::channel::Receiver<WriterMsg>,
) {
    while let Ok(msg) = rx.recv() {
        match msg {
            WriterMsg::Chunk { rows, chunk_index } => {
                write_chunk(&path, &path_lock, &fields, &rows, chunk_index);
            }
            WriterMsg::Shutdown => break,
        }
    }
}

fn write_chunk(
    path: &Path,
    path_lock: &Mutex<()>,
    fields: &[String],
    rows: &[Vec<Value>],
    chunk_index: usize,
) {
    let _guard = path_lock.lock().unwrap_or_else(|e| e.into_inner());
    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            error!("failed to open {} for append: {e}", path.display());
            return;
        }
    };
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(BufWriter::new(file));

    if chunk_index == 0 {
        if let Err(e) = writer.write_record(fields) {
            error!("failed to write header to {}: {e}", path.display());
        }
    }

    for row in rows {
        let rendered: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        if let Err(e) = writer.write_record(&rendered) {
            error!("failed to write row to {}: {e}", path.display());
        }
    }

    if let Err(e) = writer.flush() {
        error!("failed to flush {}: {e}", path.display());
    }
}
