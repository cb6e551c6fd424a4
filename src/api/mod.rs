mod backend;
pub mod client;
pub mod mock_client;
pub mod stream;

pub use backend::{ByteStream, RunBackend};
pub use client::ApiClient;
