pub mod config;
pub mod error;
pub mod gateway;
pub mod token;
pub mod types;

pub use config::Settings;
pub use error::{GatewayResult, ProxyError};
pub use gateway::Gateway;
pub use token::{derive_token, Token};
