pub mod context;
pub mod filter;
mod handler;

pub use context::RequestContext;
pub use handler::{error_response, handle_request};
