use indicatif::{ProgressBar, ProgressStyle};

/// Creates a progress bar for long running loops. Returns `None` when the
/// template cannot be parsed, in which case callers simply skip progress output.
///
/// The bar draws to stderr and hides itself when stderr is not a terminal.
pub fn progress_bar(len: u64, msg: String) -> Option<ProgressBar> {
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise} / {eta_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .ok()?
        .progress_chars("##-");

    let bar = ProgressBar::new(len);
    bar.set_style(style);
    bar.set_message(msg);

    Some(bar)
}
