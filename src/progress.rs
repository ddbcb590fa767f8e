use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str =
    "{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";

pub fn progress_bar(len: usize, prefix: impl Into<String>) -> ProgressBar {
    let style = ProgressStyle::with_template(TEMPLATE)
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    let pb = ProgressBar::new(len as u64);
    pb.set_style(style);
    pb.set_prefix(prefix.into());
    pb
}
