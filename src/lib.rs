pub mod clienv;
pub mod daemon;
pub mod driver;
pub mod error;
pub mod logging;
pub mod protocol;

pub use daemon::{DriverMeta, DriverRuntime, DriverSpec, Supervisor};
pub use driver::{Driver, DriverBuilder, DriverHandle};
pub use error::{DriverError, RpcError, SupervisorError, TransportError};
pub use protocol::{DriverState, Message, Payload};
