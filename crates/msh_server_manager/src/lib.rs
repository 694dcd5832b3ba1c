mod error;
pub mod mock;
mod monitor;
mod patterns;
mod process;

pub use error::*;
pub use mock::{MockCall, MockProcessProvider};
pub use monitor::*;
pub use patterns::*;
pub use process::manager::ProcessManager;
pub use process::provider::ProcessProvider;
pub use process::tree::ProcessTree;
