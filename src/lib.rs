pub mod config;
pub mod core;
pub mod server;
pub mod toolchain;
pub mod workspace;

pub use config::Config;
pub use toolchain::{ArduinoCli, ProcessOutput, Toolchain, ToolchainError};
pub use workspace::{SketchDir, Workspace};
