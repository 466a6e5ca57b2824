pub mod server;
pub mod socket;
pub mod state;

pub use server::{bind, build_runtime, serve, shutdown_signal};
pub use socket::SocketHeld;
pub use state::AppState;
