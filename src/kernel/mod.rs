pub mod dispatch;
pub mod driver;
pub mod process;
pub mod queue;

pub use dispatch::Kernel;
pub use driver::Driver;
