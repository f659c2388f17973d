use std::fs;
use std::io;
use std::path::Path;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzumcer::{MZUMCer, MZUMCerError};

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy()
}

fn configure_log(log_file: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(fs::File::create(path)?);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(io::stderr)
                .with_filter(env_filter()),
        )
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("Not forwarding `log` records: {e}");
    }
    Ok(guard)
}

fn main() -> Result<(), MZUMCerError> {
    let args = MZUMCer::parse();
    let _guard = configure_log(args.log_file.as_deref())?;
    if let Err(e) = args.main() {
        tracing::error!("{e}");
        return Err(e);
    }
    Ok(())
}
