pub mod lifetime;
pub mod session;

pub use session::{SessionOptions, SyncSession};
