//! A didactic multiprocessor machine: several CPUs executing a small
//! byte-pattern instruction set over partitioned shared memory, disks with
//! simulated seek time, and a resident kernel doing preemptive round-robin
//! scheduling, partition allocation, and disk-backed file I/O, all driven
//! by interrupts off a shared clock.

pub mod config;
pub mod events;
pub mod hardware;
pub mod io;
pub mod kernel;
mod random;
