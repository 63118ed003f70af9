pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod protocol;
pub mod sandbox;
pub mod session;

pub use error::{LabexecError, Result};
pub use executor::{Executor, Outcome};
pub use protocol::{CommandRequest, Response, VirtualFile};
