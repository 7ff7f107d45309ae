//! Wiring, bootstrap, and the minimal entity control-plane HTTP surface
//! (spec §5, §6).

pub mod auth_middleware;
pub mod bootstrap;
pub mod error;
pub mod server;
pub mod shutdown;
pub mod state;

pub use bootstrap::run;
pub use shutdown::Shutdown;
pub use state::AppState;
