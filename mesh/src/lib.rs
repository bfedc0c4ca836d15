//! Mesh: declarative, versioned resource APIs over pluggable transports.
//!
//! This facade crate re-exports the mesh sub-crates through a single
//! dependency with feature flags.
//!
//! | Feature | Default | Crate       |
//! |---------|---------|-------------|
//! | `http`  | **yes** | `mesh-http` |
//! | `msg`   | **yes** | `mesh-msg`  |

pub use mesh_core::*;

#[cfg(feature = "http")]
pub use mesh_http;

#[cfg(feature = "msg")]
pub use mesh_msg;

/// Install a tracing subscriber honoring `RUST_LOG`, for binaries and
/// examples that want the framework's log output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
