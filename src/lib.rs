pub mod buffer;
pub mod config;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod registry;
pub mod remote_object;
pub mod remote_request;
pub mod sys;

pub use buffer::{Buffer, BufferRelease, ObjectTable};
pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{RpcInterface, RpcProtocol};
pub use reader::{ParcelReader, ReadError};
pub use registry::ObjectRegistry;
pub use remote_object::{DeathHandlerId, RemoteObject, RemoteObjectExt};
pub use remote_request::{RemoteRequest, RemoteRequestExt};
