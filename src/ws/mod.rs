pub mod websocket;

pub use websocket::{chat_socket, CLOSE_INVALID_TOKEN, CLOSE_TOKEN_REQUIRED};
