use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, filter::Directive, fmt};

use crate::cli::{LogColor, Options};

pub fn init_tracing(opts: &Options) -> eyre::Result<()> {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let use_color = match opts.log_color {
        LogColor::Always => true,
        LogColor::Never => false,
        LogColor::Auto => std::io::stderr().is_terminal(),
    };

    let include_target = matches!(
        opts.log_level,
        tracing::Level::DEBUG | tracing::Level::TRACE
    );

    // Logs go to stderr so `run` output stays machine-readable.
    fmt()
        .with_env_filter(log_filter)
        .with_target(include_target)
        .with_ansi(use_color)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre::eyre!("setting default subscriber failed: {e}"))
}
