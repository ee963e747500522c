#![deny(clippy::as_conversions)]
use opts::Opts;
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod opts;

fn main() -> anyhow::Result<()> {
    init_logging();

    let opts = Opts::from_args();
    let params = opts.params()?;
    params.validate()?;

    let node = bullyd::Node::new(params)?;

    node.get_ctrl().install_signal_handler()?;

    node.wait();

    Ok(())
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(atty::is(atty::Stream::Stderr))
                .with_writer(io::stderr),
        )
        .init();
}
