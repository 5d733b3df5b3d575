pub mod error;
pub mod framer;
pub mod server;

pub use error::ServerError;
pub use framer::frame;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
