//! Process lifecycle: supervision, the monitor process entry point and
//! shutdown signals

mod monitor_process;
mod shutdown;
mod supervisor;

pub use monitor_process::serve_stdio;
pub use shutdown::ShutdownSignal;
pub use supervisor::{Isolation, SourceFactory, Supervisor};

#[cfg(test)]
pub use supervisor::testing;
