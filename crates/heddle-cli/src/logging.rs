use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_tree::time::Uptime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    Default,
    Verbose,
}

pub(crate) fn setup_logging(level: Level) -> Result<()> {
    let targets = Targets::new()
        .with_target("hyper", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
        .with_target("tokio", LevelFilter::WARN)
        .with_default(LevelFilter::TRACE);

    let fallback = match level {
        Level::Default => "heddle=info",
        Level::Verbose => "heddle=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let subscriber = Registry::default().with(
        tracing_tree::HierarchicalLayer::default()
            .with_targets(true)
            .with_writer(|| Box::new(std::io::stderr()))
            .with_timer(Uptime::default())
            .with_filter(filter)
            .with_filter(targets),
    );
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
