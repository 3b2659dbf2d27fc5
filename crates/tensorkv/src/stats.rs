//! Per-entity run statistics, reported by `AI.INFO`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use crate::backend::BackendKind;
use crate::device::Device;
use crate::reply::Reply;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Model,
    Script,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Model => "MODEL",
            EntityKind::Script => "SCRIPT",
        }
    }
}

/// Point in time copy of a [`RunStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub duration_us: u64,
    pub samples: u64,
    pub calls: u64,
    pub errors: u64,
}

/// Counters owned by one model or script. Created and dropped with it.
#[derive(Debug)]
pub struct RunStats {
    key: String,
    kind: EntityKind,
    backend: BackendKind,
    device: Device,
    tag: String,
    duration_us: AtomicU64,
    samples: AtomicU64,
    calls: AtomicU64,
    errors: AtomicU64,
}

impl RunStats {
    pub fn new(key: &str, kind: EntityKind, backend: BackendKind, device: Device, tag: &str) -> Self {
        Self {
            key: key.to_string(),
            kind,
            backend,
            device,
            tag: tag.to_string(),
            duration_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self, duration: Duration, samples: usize) {
        self.duration_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.samples.fetch_add(samples as u64, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Zeroes every counter, leaving the owning entity untouched.
    pub fn reset(&self) {
        self.duration_us.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
        self.calls.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            duration_us: self.duration_us.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Flat `AI.INFO` reply. Scripts have no batch notion and report `-1` samples.
    pub fn info_reply(&self) -> Reply {
        let snapshot = self.snapshot();
        let samples = match self.kind {
            EntityKind::Model => snapshot.samples as i64,
            EntityKind::Script => -1,
        };
        Reply::Array(vec![
            Reply::status("key"),
            Reply::bulk(&self.key),
            Reply::status("type"),
            Reply::status(self.kind.name()),
            Reply::status("backend"),
            Reply::status(self.backend.name()),
            Reply::status("device"),
            Reply::status(self.device.to_string()),
            Reply::status("tag"),
            Reply::bulk(&self.tag),
            Reply::status("duration"),
            Reply::Integer(snapshot.duration_us as i64),
            Reply::status("samples"),
            Reply::Integer(samples),
            Reply::status("calls"),
            Reply::Integer(snapshot.calls as i64),
            Reply::status("errors"),
            Reply::Integer(snapshot.errors as i64),
        ])
    }
}
