//! Progress UI (per-transfer bars) for download runs.

use std::collections::HashMap;
use std::io::{self, IsTerminal};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use msr_core::download::{ProgressEvent, ProgressSender, progress_channel};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const BAR_TEMPLATE: &str = "{msg:32!} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}";
const SPINNER_TEMPLATE: &str = "{spinner} {msg:32!} {bytes} {bytes_per_sec}";

/// Spawns the progress renderer when requested.
///
/// Returns the sender to hand to the scheduler and the renderer task, which
/// ends once every sender clone is dropped. When `enabled` is false (quiet
/// mode or no terminal), the sender discards events and no task is spawned.
pub(crate) fn spawn_progress_ui(enabled: bool) -> (ProgressSender, Option<JoinHandle<()>>) {
    if !enabled || !io::stderr().is_terminal() {
        return (ProgressSender::disabled(), None);
    }
    let (sender, events) = progress_channel();
    (sender, Some(tokio::spawn(render(events))))
}

async fn render(mut events: mpsc::Receiver<ProgressEvent>) {
    let mut bars = TransferBars::new(MultiProgress::new());
    while let Some(event) = events.recv().await {
        bars.apply(&event);
    }
    bars.clear();
}

/// Live bars keyed by job id.
struct TransferBars {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl TransferBars {
    fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: HashMap::new(),
        }
    }

    fn apply(&mut self, event: &ProgressEvent) {
        if event.finished {
            if let Some(bar) = self.bars.remove(&event.job_id) {
                bar.finish_and_clear();
            }
            return;
        }
        let bar = self
            .bars
            .entry(event.job_id.clone())
            .or_insert_with(|| self.multi.add(new_bar(event)));
        bar.set_position(event.bytes_written);
        if event
            .total_bytes
            .is_some_and(|total| event.bytes_written >= total)
        {
            bar.finish_and_clear();
            self.bars.remove(&event.job_id);
        }
    }

    #[cfg(test)]
    fn open(&self) -> usize {
        self.bars.len()
    }

    fn clear(&mut self) {
        for (_, bar) in self.bars.drain() {
            bar.finish_and_clear();
        }
    }
}

fn new_bar(event: &ProgressEvent) -> ProgressBar {
    let (bar, template) = match event.total_bytes {
        Some(total) => (ProgressBar::new(total), BAR_TEMPLATE),
        None => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
    };
    bar.set_style(
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(event.job_id.clone());
    bar
}
