mod handlers;
mod models;
pub mod relay;
mod state;

pub use handlers::{router, run_server};
