pub mod app;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod record;
pub mod store;

pub use error::{Error, Result};
