//! Concrete backend drivers.

mod filesystem;
mod memory;
mod noop;
mod proxy;

pub use filesystem::FilesystemDriver;
pub use memory::MemoryDriver;
pub use noop::NoopDriver;
pub use proxy::{DriverInitError, ProxyCacheDriver};
