pub mod errors;
pub mod routes;

pub use errors::{AppError, ErrorKind};
pub use routes::router;
