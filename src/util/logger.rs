//! Logging setup.
//!
//! genheap only emits records through the `log` facade. With the `builtin_env_logger` feature,
//! [`HeapBuilder::build`](crate::HeapBuilder::build) installs `env_logger` unless the embedder
//! already installed a logger.

use log::SetLoggerError;

/// Filter used when `RUST_LOG` is not set: genheap's own records at info level.
pub const DEFAULT_FILTER: &str = "genheap=info";

/// Install `env_logger`, configured from `RUST_LOG` or [`DEFAULT_FILTER`]. Fails if a logger is
/// already installed. Without the `builtin_env_logger` feature this does nothing.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::Builder::from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, DEFAULT_FILTER),
            )
            .format_timestamp_millis()
            .try_init()
        } else {
            Ok(())
        }
    }
}
