pub mod config;
pub mod error;
pub mod porter;

pub use config::Config;
pub use error::{Error, Result};
pub use porter::Porter;
