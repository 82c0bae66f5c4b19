pub mod claims;
pub mod config;
pub mod memory;
pub mod messages;
pub mod protocol;
pub mod rooms;
pub mod services;

pub use claims::{ScopeType, TokenClaims, TokenError};
pub use config::GatewayConfig;
pub use rooms::Room;
