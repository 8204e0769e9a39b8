pub mod types;
pub mod report;
pub mod config;
pub mod error;

pub use types::*;
pub use report::*;
pub use config::Config;
pub use error::OrgSignalError;
