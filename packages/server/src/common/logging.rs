use std::fmt::Display;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber. Level and format come from config so
/// nothing mutates them after startup.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| EnvFilter::new("info,budget_core=debug,sqlx=warn"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

/// Log an error at the point it is handled and hand it back with context.
pub trait LogErr<T> {
    fn log_err<M>(self, msg: M) -> anyhow::Result<T>
    where
        M: Display + Send + Sync + 'static;
}

impl<T, E> LogErr<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn log_err<M>(self, msg: M) -> anyhow::Result<T>
    where
        M: Display + Send + Sync + 'static,
    {
        self.map_err(|e| {
            let err: anyhow::Error = e.into();
            tracing::error!(error = %err, "{}", msg);
            err.context(msg)
        })
    }
}
