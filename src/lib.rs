pub mod config;
pub mod error;
pub mod logging;
pub mod providers;
pub mod relay;
pub mod server;
pub mod translate;

pub use config::{AppConfig, ResolvedProvider};
pub use error::{AppError, Result};
pub use logging::SharedLogger;
pub use relay::RelayMetrics;
pub use server::{build_router, AppState};
