pub mod dependency;

pub use dependency::{ServiceSupervisor, SupervisorConfig, SupervisorError};
