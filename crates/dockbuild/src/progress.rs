use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// 現在のビルドステップを表示するスピナー
///
/// 1回のビルドにつき1つ作り、[`crate::BuildOptionsBuilder::progress`] で渡します。
#[derive(Clone)]
pub struct BuildProgress {
    progress_bar: ProgressBar,
}

impl BuildProgress {
    pub fn new(image: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Building {}...", image));

        Self { progress_bar: pb }
    }

    /// 描画しないスピナー（非対話環境・テスト用）
    pub fn hidden() -> Self {
        Self {
            progress_bar: ProgressBar::hidden(),
        }
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    pub fn message(&self) -> String {
        self.progress_bar.message()
    }

    pub fn is_finished(&self) -> bool {
        self.progress_bar.is_finished()
    }

    pub fn finish_success(&self) {
        self.progress_bar
            .finish_with_message(format!("{} Build completed", "✓".green()));
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("{} Build failed: {}", "✗".red(), error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_tracks_messages() {
        let progress = BuildProgress::hidden();
        progress.set_message("Step 1/2 : FROM alpine");
        assert_eq!(progress.message(), "Step 1/2 : FROM alpine");
        assert!(!progress.is_finished());

        progress.finish_error("boom");
        assert!(progress.is_finished());
        assert!(progress.message().contains("Build failed: boom"));
    }
}
