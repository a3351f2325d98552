use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Optional stderr progress bar counting finished chunks. Safe to tick from
/// worker threads.
pub struct ChunkProgress {
    progress_bar: Option<ProgressBar>,
    finished: AtomicBool,
}

impl ChunkProgress {
    pub fn new(enabled: bool, total_chunks: usize, label: &str) -> Self {
        let progress_bar = if enabled {
            let bar = ProgressBar::new(total_chunks as u64);
            bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(4));
            let style = ProgressStyle::with_template(
                "{spinner:.green} {elapsed_precise} [{bar:30}] {pos}/{len} chunks {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(200));
            bar.set_message(label.to_string());
            Some(bar)
        } else {
            None
        };

        Self {
            progress_bar,
            finished: AtomicBool::new(false),
        }
    }

    pub fn chunk_done(&self) {
        if let Some(bar) = &self.progress_bar {
            bar.inc(1);
        }
    }

    pub fn finish(&self, message: String) {
        if let Some(bar) = &self.progress_bar {
            bar.finish_with_message(message);
        }
        self.finished.store(true, Ordering::Relaxed);
    }
}

impl Drop for ChunkProgress {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Relaxed)
            && let Some(bar) = &self.progress_bar
        {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ChunkProgress;

    #[test]
    fn disabled_progress_is_inert() {
        let progress = ChunkProgress::new(false, 4, "low-coverage");
        progress.chunk_done();
        progress.finish("done".to_string());
    }
}
