use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

pub struct BuildProgress {
    service: String,
    progress_bar: ProgressBar,
}

impl BuildProgress {
    /// 並行ビルド用に MultiProgress の下にスピナーを作る
    pub fn new_in(multi: &MultiProgress, service_name: &str) -> Self {
        let pb = multi.add(ProgressBar::new_spinner());
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {prefix:.bold} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_prefix(service_name.to_string());
        pb.set_message("building...");
        pb.enable_steady_tick(std::time::Duration::from_millis(120));

        Self {
            service: service_name.to_string(),
            progress_bar: pb,
        }
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    pub fn finish_success(&self) {
        self.progress_bar
            .finish_with_message(format!("{} built ✓", self.service));
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("Build failed: {}", error));
    }
}
