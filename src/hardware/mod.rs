pub mod clock;
pub mod cpu;
pub mod disk;
pub mod interrupts;
pub mod memory;

pub use clock::Clock;
pub use cpu::CpuContext;
pub use disk::DiskUnit;
pub use interrupts::InterruptMailbox;
pub use memory::{MemoryStore, Mmu};
