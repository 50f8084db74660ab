//! Profiling utilities based on the `puffin` crate.
//!
//! With the `profiling` feature disabled the scope macros expand to nothing, so
//! instrumented code compiles the same either way.

use crate::config::BenchmarkMode;

#[cfg(feature = "profiling")]
pub use puffin::{profile_function, profile_scope};

#[cfg(not(feature = "profiling"))]
pub use crate::{profile_function, profile_scope};

#[cfg(not(feature = "profiling"))]
#[doc(hidden)]
#[macro_export]
macro_rules! profile_function {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "profiling"))]
#[doc(hidden)]
#[macro_export]
macro_rules! profile_scope {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "profiling")]
static PROFILING_SERVER: std::sync::OnceLock<puffin_http::Server> = std::sync::OnceLock::new();

/// Default address used by [`BenchmarkMode::WithWebserver`].
pub const PUFFIN_ADDRESS: &str = "0.0.0.0:8585";

/// Turn profiling on according to `mode`.
///
/// # Example
/// ```no_run
/// use kiln_core::config::BenchmarkMode;
/// use kiln_core::profiling::init_profiling;
///
/// init_profiling(BenchmarkMode::WithWebserver);
/// ```
pub fn init_profiling(mode: BenchmarkMode) {
    #[cfg(feature = "profiling")]
    {
        puffin::set_scopes_on(mode.is_enabled());

        if mode == BenchmarkMode::WithWebserver {
            match puffin_http::Server::new(PUFFIN_ADDRESS) {
                Ok(server) => {
                    tracing::info!("Puffin profiler server started on http://{PUFFIN_ADDRESS}");
                    let _ = PROFILING_SERVER.set(server);
                }
                Err(e) => {
                    tracing::error!("Failed to start puffin server: {}", e);
                }
            }
        }
    }

    #[cfg(not(feature = "profiling"))]
    if mode.is_enabled() {
        tracing::warn!("profiling requested but kiln-core was built without the `profiling` feature");
    }
}

/// Mark the start of a new frame for profiling.
#[inline]
pub fn new_frame() {
    #[cfg(feature = "profiling")]
    puffin::GlobalProfiler::lock().new_frame();
}
