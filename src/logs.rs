//! In-memory log sink for the managed service
//!
//! Captured output and install transcripts are kept in a 500-line ring
//! buffer. Each line is stamped with local wall-clock time on append.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Ring buffer capacity
pub const LOG_CAPACITY: usize = 500;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Called with every stored line, in append order
pub type AppendListener = Box<dyn Fn(&str) + Send + Sync>;

pub struct LogSink {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    listener: Option<AppendListener>,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink {
    pub fn new() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            listener: None,
        }
    }

    /// Notify `listener` of each stored line. It runs under the buffer lock,
    /// so it sees lines in exactly the order they were stored.
    pub fn on_append(mut self, listener: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Stamp and store a line, evicting the oldest when full.
    /// Returns the stored (timestamped) line.
    pub fn append(&self, line: &str) -> String {
        let stamp = chrono::Local::now().format(TIMESTAMP_FORMAT);
        let stored = format!("[{}] {}", stamp, line.trim_end_matches(['\r', '\n']));

        if let Ok(mut lines) = self.lines.lock() {
            while lines.len() >= self.capacity {
                lines.pop_front();
            }
            lines.push_back(stored.clone());
            if let Some(listener) = &self.listener {
                listener(&stored);
            }
        }
        stored
    }

    /// The last `n` lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => {
                let start = lines.len().saturating_sub(n);
                lines.iter().skip(start).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
