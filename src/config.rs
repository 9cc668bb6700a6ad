use std::path::PathBuf;
use std::time::Duration;

/// Simulation parameters. The core consumes this; it does not own or reload
/// it. Defaults follow the classic classroom machine: a small multi-CPU
/// box with two disks sharing one image file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Real time per simulated clock tick.
    pub quantum: Duration,
    /// Clock ticks between timer interrupts.
    pub timer_period: u64,
    /// Clock ticks a CPU sleeps per fetch-execute cycle.
    pub cpu_cycle_ticks: u64,
    pub num_cpus: usize,
    pub num_partitions: usize,
    /// Words per memory partition.
    pub partition_size: usize,
    /// Words per disk.
    pub disk_size: usize,
    /// One image path per disk; the number of disks follows from this.
    pub disk_images: Vec<PathBuf>,
    /// Simulated seek delay per disk request, in clock ticks.
    pub min_turns: u64,
    pub max_turns: u64,
    /// Timer interrupts a process may consume before preemption.
    pub min_slice: u32,
    pub max_slice: u32,
    /// Processes seeded at startup, all loaded from disk 0.
    pub initial_processes: usize,
    pub initial_load_address: usize,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            quantum: Duration::from_millis(3),
            timer_period: 2,
            cpu_cycle_ticks: 2,
            num_cpus: 2,
            num_partitions: 6,
            partition_size: 128,
            disk_size: 1024,
            disk_images: vec![PathBuf::from("data/disk.txt"), PathBuf::from("data/disk.txt")],
            min_turns: 10,
            max_turns: 30,
            min_slice: 10,
            max_slice: 10,
            initial_processes: 2,
            initial_load_address: 4,
            seed: 0x5EED,
        }
    }
}

impl Config {
    pub fn num_disks(&self) -> usize {
        self.disk_images.len()
    }

    pub fn memory_size(&self) -> usize {
        self.partition_size * self.num_partitions
    }
}
