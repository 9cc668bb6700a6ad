use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Result;

use super::dispatch::Kernel;
use crate::config::Config;
use crate::events::EventSink;
use crate::hardware::clock::Clock;
use crate::hardware::cpu::{self, CpuContext};
use crate::hardware::disk::DiskUnit;
use crate::hardware::interrupts::InterruptMailbox;
use crate::hardware::memory::{MemoryStore, Mmu};
use crate::io::console::{self, Console};
use crate::io::image;
use crate::random::Rng;

/// Assembles the machine and brings it to life: one thread per CPU and per
/// disk, the clock driver, and the console listener. Owns the hardware so a
/// caller can inspect or step it.
pub struct Driver {
    config: Config,
    clock: Arc<Clock>,
    mailbox: Arc<InterruptMailbox>,
    console: Arc<Console>,
    cpus: Vec<Arc<CpuContext>>,
    mmus: Vec<Arc<Mmu>>,
    disks: Vec<Arc<DiskUnit>>,
    kernel: Arc<Kernel>,
    threads: Vec<JoinHandle<()>>,
}

impl Driver {
    /// Build the machine cold: images loaded, no threads running yet.
    pub fn new(config: Config, events: Arc<dyn EventSink>) -> Result<Driver> {
        let mailbox = Arc::new(InterruptMailbox::new());
        let clock = Arc::new(Clock::new(
            config.quantum,
            config.timer_period,
            Some(mailbox.clone()),
        ));
        let memory = Arc::new(MemoryStore::new(
            config.partition_size,
            config.num_partitions,
        ));

        let mut disks = Vec::with_capacity(config.num_disks());
        for (id, path) in config.disk_images.iter().enumerate() {
            let disk = Arc::new(DiskUnit::new(id, config.disk_size));
            disk.load_image(&image::load_image_file(path, config.disk_size)?);
            disks.push(disk);
        }

        let cpus: Vec<_> = (0..config.num_cpus)
            .map(|id| Arc::new(CpuContext::new(id)))
            .collect();
        let mmus: Vec<_> = cpus
            .iter()
            .map(|_| Arc::new(Mmu::new(memory.clone(), mailbox.clone())))
            .collect();
        let console = Arc::new(Console::new());

        let kernel = Arc::new(Kernel::new(
            &config,
            memory,
            console.clone(),
            events,
            cpus.clone(),
            mmus.clone(),
            disks.clone(),
        ));

        Ok(Driver {
            config,
            clock,
            mailbox,
            console,
            cpus,
            mmus,
            disks,
            kernel,
            threads: Vec::new(),
        })
    }

    /// Seed the initial processes and start every hardware thread.
    pub fn start(&mut self) {
        for _ in 0..self.config.initial_processes {
            self.kernel
                .load_program(0, self.config.initial_load_address);
        }

        for disk in &self.disks {
            let rng = Rng::seeded(self.config.seed ^ (disk.id() as u64 + 1));
            self.threads.push(disk.start(
                self.clock.clone(),
                self.mailbox.clone(),
                rng,
                self.config.min_turns,
                self.config.max_turns,
            ));
        }
        for (ctx, mmu) in self.cpus.iter().zip(&self.mmus) {
            self.threads.push(cpu::start_processor(
                ctx.clone(),
                mmu.clone(),
                self.clock.clone(),
                self.mailbox.clone(),
                self.kernel.clone(),
                self.config.cpu_cycle_ticks,
            ));
        }
        self.threads.push(console::start_listener(
            self.console.clone(),
            self.mailbox.clone(),
        ));
        self.threads.push(self.clock.start_driver());
        log::info!(
            "machine up: {} cpus, {} disks, {} partitions of {} words",
            self.config.num_cpus,
            self.config.num_disks(),
            self.config.num_partitions,
            self.config.partition_size
        );
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }
}
