//! JSONL callback recorder.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;

use ndid_callback::{CallbackEnvelope, CallbackSink};

/// Appends every envelope it sees, in wire form, one per line.
pub struct JsonlRecorder {
    out: Mutex<BufWriter<File>>,
}

impl JsonlRecorder {
    /// Open `path` for appending, creating it if needed.
    pub fn append_to(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl CallbackSink for JsonlRecorder {
    fn deliver(&self, envelope: &CallbackEnvelope) {
        let mut out = self.out.lock();
        let written = serde_json::to_writer(&mut *out, &envelope.to_json())
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(e) = written {
            tracing::warn!(node = %envelope.node_id, kind = envelope.kind_label(), error = %e, "failed to record callback");
        }
    }
}
