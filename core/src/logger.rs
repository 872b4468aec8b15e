use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::{
    filter::Directive,
    fmt::format::{Format, Writer},
    EnvFilter,
};

/// Target of every event this crate emits.
const CRATE_TARGET: &str = "sqlbulk";

struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, writer: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "{} - {}", now.format("%d %B"), now.format("%H:%M:%S%.6f"))
    }
}

fn build_filter(log_level: LevelFilter, statements: bool) -> EnvFilter {
    let mut filter = EnvFilter::builder().with_default_directive(log_level.into()).from_env_lossy();
    if statements {
        if let Ok(directive) = format!("{}=debug", CRATE_TARGET).parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn install(filter: EnvFilter) {
    let format = Format::default().with_timer(LocalTimer).with_level(true).with_target(false);

    let subscriber =
        tracing_subscriber::fmt().with_env_filter(filter).event_format(format).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("Logger has already been set up, continuing...");
    }
}

/// Installs a global fmt subscriber. `RUST_LOG` wins over `log_level` when set, a second
/// call leaves the first subscriber in place.
pub fn setup_logger(log_level: LevelFilter) {
    install(build_filter(log_level, false));
}

pub fn setup_info_logger() {
    setup_logger(LevelFilter::INFO);
}

/// Info for everything else, debug for this crate: every statement and staging load is
/// logged.
pub fn setup_statement_logger() {
    install(build_filter(LevelFilter::INFO, true));
}
