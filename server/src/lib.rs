pub mod connect;
pub mod disconnect;
pub mod error;
pub mod observability;
pub mod presence;
pub mod sanitize;
pub mod socket;
pub mod state;
pub mod submit;
pub mod testing;
pub mod throttle;

pub use error::GatewayError;
pub use socket::build_socket_layer;
pub use state::{GatewayState, SharedSession, SocketSession};
