use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use fabry_core::pipeline::{PipelineStage, ProgressReporter};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// One spinner (or bar, when the item count is known) per running stage.
pub struct StageProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<PipelineStage, ProgressBar>>,
}

impl StageProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar_for(stage: PipelineStage, total: Option<usize>) -> ProgressBar {
        let bar = match total {
            Some(n) => {
                let bar = ProgressBar::new(n as u64);
                if let Ok(style) = ProgressStyle::default_bar().template("{msg:28} [{bar:30}] {pos}/{len}") {
                    bar.set_style(style.progress_chars("=> "));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
                    bar.set_style(style);
                }
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            }
        };
        bar.set_message(stage.to_string());
        bar
    }
}

impl ProgressReporter for StageProgress {
    fn begin_stage(&self, stage: PipelineStage, total_items: Option<usize>) {
        let bar = self.multi.add(Self::bar_for(stage, total_items));
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(stage, bar);
        }
    }

    fn advance(&self, stage: PipelineStage, items_done: usize) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(&stage) {
                bar.inc(items_done as u64);
            }
        }
    }

    fn finish_stage(&self, stage: PipelineStage) {
        if let Ok(mut bars) = self.bars.lock() {
            if let Some(bar) = bars.remove(&stage) {
                bar.finish_with_message(format!("{} done", stage.slug()));
            }
        }
    }
}
