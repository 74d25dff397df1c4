pub mod command;
pub mod driver;
pub mod state;
pub mod supervisor;

pub use command::Command;
pub use driver::{DriverConfig, DriverEvent, DriverReport, PlaybackDriver};
pub use state::{DriverState, StopReason};
pub use supervisor::{
    DriverHandle, JoinOutcome, OpenInfo, ShutdownReport, Supervisor, SupervisorConfig,
    SupervisorError, WorkerHandle,
};
