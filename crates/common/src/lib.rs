pub mod config;
pub mod error;
pub mod exchange;
pub mod ids;
pub mod rounding;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::ExchangeAdapter;
