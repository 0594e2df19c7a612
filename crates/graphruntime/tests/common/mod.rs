#![allow(dead_code)]

use graphcore::NodeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Shared execution log
#[derive(Clone, Default)]
pub struct Trace {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Trace {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn position(&self, entry: &str) -> usize {
        self.snapshot()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("'{}' never ran", entry))
    }
}

/// Blocks the calling worker until `flag` is set; errors out after 5s so a
/// broken ordering shows up as a failure instead of a hang.
pub fn wait_for_flag(flag: &AtomicBool) -> Result<(), NodeError> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !flag.load(Ordering::Acquire) {
        if Instant::now() > deadline {
            return Err(NodeError::failed("timed out waiting for flag"));
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}
