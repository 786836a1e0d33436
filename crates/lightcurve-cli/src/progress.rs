use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use lightcurve_core::progress::{ProcessingStage, ProgressReporter};

/// Drives one indicatif bar from pipeline progress events.
pub struct BarReporter {
    pb: ProgressBar,
}

impl BarReporter {
    pub fn new() -> Result<Self> {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg:24} [{bar:40}] {pos}/{len}")?
                .progress_chars("=> "),
        );
        Ok(Self { pb })
    }
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, stage: ProcessingStage, total_items: Option<usize>) {
        self.pb.reset();
        self.pb.set_length(total_items.unwrap_or(0) as u64);
        self.pb.set_message(stage.to_string());
    }

    fn advance(&self, items_done: usize) {
        self.pb.set_position(items_done as u64);
    }

    fn finish_stage(&self) {
        self.pb.finish();
    }
}
