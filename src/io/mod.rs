pub mod console;
pub mod image;

pub use console::Console;
