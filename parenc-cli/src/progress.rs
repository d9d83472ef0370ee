//! Terminal progress rendering for encode runs.
//!
//! Implements the core's `EncodeMonitor` with one indicatif bar per file,
//! fed by the progress samples the workers stream through the managed
//! queue.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parenc_core::EncodeMonitor;

pub struct ProgressRenderer {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl Default for ProgressRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRenderer {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar_for(&self, filename: &str) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap();
        bars.entry(filename.to_string())
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {percent}%")
                        .unwrap()
                        .progress_chars("█▓▒░ "),
                );
                bar.set_message(filename.to_string());
                bar
            })
            .clone()
    }
}

impl EncodeMonitor for ProgressRenderer {
    fn on_progress(&self, filename: &str, percent: f32, done: usize, total: usize) {
        let bar = self.bar_for(filename);
        let position = percent.clamp(0.0, 100.0) as u64;
        bar.set_position(position);
        if position >= 100 {
            bar.finish_with_message(format!("{filename} ({done}/{total})"));
        }
    }

    fn on_output(&self, path: &Path, variant: Option<&str>) {
        let tag = variant.map(|v| format!(" [{v}]")).unwrap_or_default();
        let _ = self
            .multi
            .println(format!("  output: {}{tag}", path.display()));
    }
}
