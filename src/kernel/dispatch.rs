use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex};

use super::process::{FileHandle, FileMode, PendingOp, Pid, ProcessRecord};
use super::queue::ProcessQueue;
use crate::config::Config;
use crate::events::EventSink;
use crate::hardware::cpu::CpuContext;
use crate::hardware::disk::{DiskError, DiskOp, DiskRequest, DiskUnit};
use crate::hardware::interrupts as interrupt;
use crate::hardware::memory::{MemoryStore, Mmu};
use crate::io::Console;
use crate::random::Rng;

/// Partitions 0 and 1 are reserved for the resident system.
const KERNEL_PARTITIONS: usize = 2;

/// Syscall status codes returned in r0.
const STATUS_OK: i32 = 0;
const STATUS_INVALID: i32 = 1;
const STATUS_EOF: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    System,
    Free,
    Used,
}

/// Kernel-side view of one disk: whether a request is in flight and the
/// FIFO of requests waiting for the device to come back.
struct DiskChannel {
    busy: bool,
    backlog: VecDeque<DiskRequest>,
}

struct KernelState {
    next_pid: Pid,
    partitions: Vec<PartitionState>,
    ready: ProcessQueue,
    /// One running record per CPU; never empty, idle fills the gap.
    running: Vec<ProcessRecord>,
    disk_waits: Vec<ProcessQueue>,
    disk_channels: Vec<DiskChannel>,
    rng: Rng,
    created: u64,
    terminated: u64,
}

/// Point-in-time copy of the scheduling state, for viewers and tests.
#[derive(Debug, Clone)]
pub struct KernelSnapshot {
    pub ready: Vec<Pid>,
    pub running: Vec<Pid>,
    pub disk_waits: Vec<Vec<Pid>>,
    pub partitions: Vec<PartitionState>,
    pub created: u64,
    pub terminated: u64,
}

/// The resident kernel. Owns the partition table, every queue, and the
/// per-disk backlog; `handle` is the single dispatch entry every hardware
/// thread calls, and the state mutex makes it one global critical section:
/// while one interrupt is handled, no other queue or partition mutation can
/// proceed.
pub struct Kernel {
    state: Mutex<KernelState>,
    cpus: Vec<Arc<CpuContext>>,
    mmus: Vec<Arc<Mmu>>,
    disks: Vec<Arc<DiskUnit>>,
    memory: Arc<MemoryStore>,
    console: Arc<Console>,
    events: Arc<dyn EventSink>,
    min_slice: u32,
    max_slice: u32,
}

impl Kernel {
    pub fn new(
        config: &Config,
        memory: Arc<MemoryStore>,
        console: Arc<Console>,
        events: Arc<dyn EventSink>,
        cpus: Vec<Arc<CpuContext>>,
        mmus: Vec<Arc<Mmu>>,
        disks: Vec<Arc<DiskUnit>>,
    ) -> Kernel {
        let mut partitions = vec![PartitionState::Free; config.num_partitions];
        for slot in partitions.iter_mut().take(KERNEL_PARTITIONS) {
            *slot = PartitionState::System;
        }
        let state = KernelState {
            next_pid: 2,
            partitions,
            ready: ProcessQueue::new("ready", events.clone()),
            running: cpus.iter().map(|_| ProcessRecord::idle()).collect(),
            disk_waits: disks
                .iter()
                .map(|disk| ProcessQueue::new(format!("disk {}", disk.id()), events.clone()))
                .collect(),
            disk_channels: disks
                .iter()
                .map(|_| DiskChannel {
                    busy: false,
                    backlog: VecDeque::new(),
                })
                .collect(),
            rng: Rng::seeded(config.seed),
            created: 0,
            terminated: 0,
        };
        let kernel = Kernel {
            state: Mutex::new(state),
            cpus,
            mmus,
            disks,
            memory,
            console,
            events,
            min_slice: config.min_slice,
            max_slice: config.max_slice,
        };
        let state = kernel.state.lock().unwrap();
        for cpu in 0..kernel.cpus.len() {
            kernel.install_context(&state, cpu);
        }
        drop(state);
        kernel
    }

    /// The dispatch entry. Saves the calling CPU's context, branches on the
    /// interrupt number, and reinstalls the (possibly new) current process
    /// before returning to the caller.
    pub fn handle(&self, code: u32, cpu: usize) {
        self.events.interrupt(cpu, code);
        let mut state = self.state.lock().unwrap();
        log::debug!("kernel called for int {code} on cpu {cpu}");
        self.save_context(&mut state, cpu);
        let num_disks = self.disks.len() as u32;
        match code {
            interrupt::ILLEGAL_INSTRUCTION => {
                log::error!("illegal instruction on cpu {cpu}");
                self.kill_current(&mut state, cpu);
            }
            interrupt::TIMER => self.timer_tick(&mut state),
            interrupt::PROTECTION_FAULT => {
                log::error!("illegal memory access on cpu {cpu}");
                self.kill_current(&mut state, cpu);
            }
            interrupt::CONSOLE => self.console_command(&mut state),
            interrupt::EXIT => self.kill_current(&mut state, cpu),
            interrupt::OPEN => self.sys_open(&mut state, cpu),
            interrupt::CLOSE => self.sys_close(&mut state, cpu),
            interrupt::GET => self.sys_get(&mut state, cpu),
            interrupt::PUT => self.sys_put(&mut state, cpu),
            interrupt::PRINT => self.sys_print(&state, cpu),
            code if (interrupt::DISK_BASE..interrupt::DISK_BASE + num_disks).contains(&code) => {
                self.disk_complete(&mut state, (code - interrupt::DISK_BASE) as usize);
            }
            _ => log::warn!("unknown interrupt: {code}"),
        }
        self.install_context(&state, cpu);
    }

    /// Console-path process creation, also used to seed the initial
    /// processes at startup.
    pub fn load_program(&self, disk: usize, address: usize) {
        let mut state = self.state.lock().unwrap();
        if disk >= self.disks.len() {
            log::error!("invalid disk {disk}: this machine has {}", self.disks.len());
            return;
        }
        self.spawn_load(&mut state, disk, address);
    }

    pub fn snapshot(&self) -> KernelSnapshot {
        let state = self.state.lock().unwrap();
        KernelSnapshot {
            ready: state.ready.pids(),
            running: state.running.iter().map(ProcessRecord::pid).collect(),
            disk_waits: state.disk_waits.iter().map(ProcessQueue::pids).collect(),
            partitions: state.partitions.clone(),
            created: state.created,
            terminated: state.terminated,
        }
    }

    fn save_context(&self, state: &mut KernelState, cpu: usize) {
        let regs = self.cpus[cpu].registers();
        let proc = &mut state.running[cpu];
        proc.pc = regs.pc;
        proc.gpr = regs.gpr;
        proc.flags = regs.flags;
    }

    fn install_context(&self, state: &KernelState, cpu: usize) {
        let proc = &state.running[cpu];
        let partition_size = self.memory.partition_size();
        let base = proc.partition() * partition_size;
        self.mmus[cpu].set_window(base, base + partition_size);
        let mut regs = self.cpus[cpu].registers();
        regs.pc = proc.pc;
        regs.gpr = proc.gpr;
        regs.flags = proc.flags;
    }

    /// Pop the next ready process, or materialize an idle record, and give
    /// it a fresh randomized slice.
    fn next_ready(&self, state: &mut KernelState) -> ProcessRecord {
        let mut proc = state.ready.pop_front().unwrap_or_else(ProcessRecord::idle);
        proc.slice = state.rng.range(self.min_slice as u64, self.max_slice as u64) as u32;
        proc
    }

    fn kill_current(&self, state: &mut KernelState, cpu: usize) {
        let next = self.next_ready(state);
        let old = mem::replace(&mut state.running[cpu], next);
        self.release(state, old);
    }

    /// Terminate a record: reclaim its partition. Idle records own nothing
    /// and simply evaporate.
    fn release(&self, state: &mut KernelState, proc: ProcessRecord) {
        if proc.is_idle() {
            return;
        }
        log::info!(
            "process {} terminated, partition {} freed",
            proc.pid(),
            proc.partition()
        );
        state.partitions[proc.partition()] = PartitionState::Free;
        state.terminated += 1;
    }

    /// One timer interrupt is one slice tick for every CPU. A CPU whose
    /// running process exhausted its slice is held at an instruction
    /// boundary via its gate and rotated; a CPU running idle picks up real
    /// work as soon as any is ready.
    fn timer_tick(&self, state: &mut KernelState) {
        for cpu in 0..state.running.len() {
            let rotate = {
                let proc = &mut state.running[cpu];
                if proc.slice > 0 {
                    proc.slice -= 1;
                }
                if proc.is_idle() {
                    !state.ready.is_empty()
                } else {
                    proc.slice == 0
                }
            };
            if !rotate {
                continue;
            }
            let _gate = self.cpus[cpu].gate();
            self.save_context(state, cpu);
            let old = mem::replace(&mut state.running[cpu], ProcessRecord::idle());
            if !old.is_idle() {
                state.ready.push_back(old);
            }
            state.running[cpu] = self.next_ready(state);
            self.install_context(state, cpu);
            log::debug!(
                "time slice over on cpu {cpu}: now runs pid {}",
                state.running[cpu].pid()
            );
        }
    }

    fn disk_complete(&self, state: &mut KernelState, disk_id: usize) {
        let error = self.disks[disk_id].error();
        match state.disk_waits[disk_id].pop_front() {
            Some(proc) => self.finish_device_op(state, disk_id, proc, error),
            // The kernel enqueues a process before submitting its request,
            // so a completion always finds a waiter; anything else is a
            // kernel bug worth shouting about.
            None => log::error!("disk {disk_id} completion with empty wait queue"),
        }
        let channel = &mut state.disk_channels[disk_id];
        match channel.backlog.pop_front() {
            Some(request) => self.disks[disk_id].submit(request),
            None => channel.busy = false,
        }
    }

    fn finish_device_op(
        &self,
        state: &mut KernelState,
        disk_id: usize,
        mut proc: ProcessRecord,
        error: DiskError,
    ) {
        let disk = &self.disks[disk_id];
        match proc.pending {
            PendingOp::Loading => {
                if error == DiskError::Success {
                    let partition_size = self.memory.partition_size();
                    let base = proc.partition() * partition_size;
                    let count = disk.size().min(partition_size);
                    for offset in 0..count {
                        self.memory.super_write(base + offset, disk.data(offset));
                    }
                    log::info!(
                        "process {} loaded into partition {} ({count} words)",
                        proc.pid(),
                        proc.partition()
                    );
                    proc.pending = PendingOp::None;
                    state.ready.push_back(proc);
                } else {
                    log::error!("load failed for process {}: {error:?}", proc.pid());
                    self.release(state, proc);
                }
            }
            PendingOp::Open { file } => {
                match proc.file(file).map(|handle| handle.mode) {
                    // A write-mode open starts at size 0; the region need
                    // not contain a sentinel yet, so a scan error is fine.
                    Some(FileMode::Write) => {
                        proc.gpr[0] = STATUS_OK;
                        proc.gpr[1] = file as i32;
                    }
                    Some(FileMode::Read) if error == DiskError::Success => {
                        let size = disk.size();
                        if let Some(handle) = proc.file_mut(file) {
                            handle.size = size;
                        }
                        proc.gpr[0] = STATUS_OK;
                        proc.gpr[1] = file as i32;
                    }
                    Some(FileMode::Read) => {
                        log::warn!("open failed for process {}: {error:?}", proc.pid());
                        proc.remove_file(file);
                        proc.gpr[0] = STATUS_INVALID;
                    }
                    None => {
                        log::error!("open completion for unknown file {file}");
                        proc.gpr[0] = STATUS_INVALID;
                    }
                }
                proc.pending = PendingOp::None;
                state.ready.push_back(proc);
            }
            PendingOp::Get { file } => {
                if error == DiskError::Success && disk.size() > 0 {
                    proc.gpr[1] = disk.data(0) as i32;
                    if let Some(handle) = proc.file_mut(file) {
                        handle.advance_read();
                    }
                    proc.gpr[0] = STATUS_OK;
                } else {
                    log::warn!("get failed for process {}: {error:?}", proc.pid());
                    proc.gpr[0] = STATUS_INVALID;
                }
                proc.pending = PendingOp::None;
                state.ready.push_back(proc);
            }
            PendingOp::Put { file } => {
                if error == DiskError::Success {
                    if let Some(handle) = proc.file_mut(file) {
                        handle.advance_write();
                    }
                    proc.gpr[0] = STATUS_OK;
                } else {
                    log::warn!("put failed for process {}: {error:?}", proc.pid());
                    proc.gpr[0] = STATUS_INVALID;
                }
                proc.pending = PendingOp::None;
                state.ready.push_back(proc);
            }
            PendingOp::None => {
                log::error!(
                    "disk {disk_id} completion for process {} with nothing pending",
                    proc.pid()
                );
                state.ready.push_back(proc);
            }
        }
    }

    fn console_command(&self, state: &mut KernelState) {
        let Some(line) = self.console.take_line() else {
            log::warn!("console interrupt with no line buffered");
            return;
        };
        let mut tokens = line.split_whitespace();
        let disk = tokens.next().map(str::parse::<usize>);
        let address = tokens.next().map(str::parse::<usize>);
        let (Some(Ok(disk)), Some(Ok(address))) = (disk, address) else {
            log::error!("could not parse console entry {line:?}: expected 'disk address'");
            return;
        };
        if disk >= self.disks.len() {
            log::error!(
                "invalid disk {disk}: please choose a disk below {}",
                self.disks.len()
            );
            return;
        }
        self.spawn_load(state, disk, address);
    }

    /// Allocate a process in a free partition and start loading its image
    /// from the given disk. The process waits on the disk, not the CPU.
    fn spawn_load(&self, state: &mut KernelState, disk: usize, address: usize) {
        let Some(mut proc) = Self::create_process(state) else {
            return;
        };
        proc.pending = PendingOp::Loading;
        log::info!(
            "process {} loading from disk {disk} address {address}",
            proc.pid()
        );
        state.disk_waits[disk].push_back(proc);
        self.submit_or_backlog(
            state,
            disk,
            DiskRequest {
                op: DiskOp::Load,
                address,
                data: 0,
            },
        );
    }

    fn create_process(state: &mut KernelState) -> Option<ProcessRecord> {
        let partition = state
            .partitions
            .iter()
            .enumerate()
            .skip(KERNEL_PARTITIONS)
            .find(|(_, partition)| **partition == PartitionState::Free)
            .map(|(index, _)| index);
        let Some(partition) = partition else {
            log::error!("error creating new process: no partitions available");
            return None;
        };
        state.partitions[partition] = PartitionState::Used;
        let pid = state.next_pid;
        state.next_pid += 1;
        state.created += 1;
        Some(ProcessRecord::new(pid, partition))
    }

    /// One request in flight per disk; the rest wait in the kernel's
    /// backlog in submission order.
    fn submit_or_backlog(&self, state: &mut KernelState, disk: usize, request: DiskRequest) {
        let channel = &mut state.disk_channels[disk];
        if channel.busy {
            channel.backlog.push_back(request);
        } else {
            channel.busy = true;
            self.disks[disk].submit(request);
        }
    }

    /// Move the caller's current process to a disk wait queue and refill
    /// the CPU slot from the ready queue.
    fn block_on_disk(
        &self,
        state: &mut KernelState,
        cpu: usize,
        disk: usize,
        request: DiskRequest,
    ) {
        let next = self.next_ready(state);
        let proc = mem::replace(&mut state.running[cpu], next);
        state.disk_waits[disk].push_back(proc);
        self.submit_or_backlog(state, disk, request);
    }

    fn sys_open(&self, state: &mut KernelState, cpu: usize) {
        let blocked = {
            let proc = &mut state.running[cpu];
            let mode = FileMode::from_arg(proc.gpr[1]);
            let disk = proc.gpr[2];
            let address = proc.gpr[3];
            let valid_disk = (0..self.disks.len() as i32).contains(&disk);
            let valid_address = valid_disk
                && address >= 0
                && (address as usize) < self.disks[disk as usize].capacity();
            match (mode, valid_address) {
                (Some(mode), true) => {
                    let disk = disk as usize;
                    let address = address as usize;
                    let file = proc.open_file(FileHandle::new(disk, address, mode));
                    proc.pending = PendingOp::Open { file };
                    Some((
                        disk,
                        DiskRequest {
                            op: DiskOp::Load,
                            address,
                            data: 0,
                        },
                    ))
                }
                _ => {
                    log::warn!(
                        "process {} open rejected: mode {} disk {disk} address {address}",
                        proc.pid(),
                        proc.gpr[1]
                    );
                    proc.gpr[0] = STATUS_INVALID;
                    None
                }
            }
        };
        if let Some((disk, request)) = blocked {
            self.block_on_disk(state, cpu, disk, request);
        }
    }

    fn sys_close(&self, state: &mut KernelState, cpu: usize) {
        let proc = &mut state.running[cpu];
        let file = proc.gpr[1] as u32;
        proc.gpr[0] = match proc.remove_file(file) {
            Some(_) => STATUS_OK,
            None => {
                log::warn!("process {} closed unknown file {file}", proc.pid());
                STATUS_INVALID
            }
        };
    }

    fn sys_get(&self, state: &mut KernelState, cpu: usize) {
        let blocked = {
            let proc = &mut state.running[cpu];
            let file = proc.gpr[1] as u32;
            match proc.file(file) {
                Some(handle) if handle.mode == FileMode::Read && handle.has_unread() => {
                    let disk = handle.disk;
                    let address = handle.cursor_address();
                    proc.pending = PendingOp::Get { file };
                    Some((
                        disk,
                        DiskRequest {
                            op: DiskOp::Read,
                            address,
                            data: 0,
                        },
                    ))
                }
                Some(handle) if handle.mode == FileMode::Read => {
                    proc.gpr[0] = STATUS_EOF;
                    None
                }
                _ => {
                    proc.gpr[0] = STATUS_INVALID;
                    None
                }
            }
        };
        if let Some((disk, request)) = blocked {
            self.block_on_disk(state, cpu, disk, request);
        }
    }

    fn sys_put(&self, state: &mut KernelState, cpu: usize) {
        let blocked = {
            let proc = &mut state.running[cpu];
            let file = proc.gpr[1] as u32;
            let data = proc.gpr[2] as u32;
            match proc.file(file) {
                Some(handle) if handle.mode == FileMode::Write => {
                    let disk = handle.disk;
                    let address = handle.cursor_address();
                    proc.pending = PendingOp::Put { file };
                    Some((
                        disk,
                        DiskRequest {
                            op: DiskOp::Write,
                            address,
                            data,
                        },
                    ))
                }
                _ => {
                    proc.gpr[0] = STATUS_INVALID;
                    None
                }
            }
        };
        if let Some((disk, request)) = blocked {
            self.block_on_disk(state, cpu, disk, request);
        }
    }

    fn sys_print(&self, state: &KernelState, cpu: usize) {
        let bytes = (state.running[cpu].gpr[1] as u32).to_be_bytes();
        self.events.program_output(&format!(
            "{} {} {} {}",
            bytes[0], bytes[1], bytes[2], bytes[3]
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogSink;
    use crate::hardware::disk::SENTINEL;
    use crate::hardware::InterruptMailbox;

    struct Fixture {
        kernel: Arc<Kernel>,
        disks: Vec<Arc<DiskUnit>>,
        console: Arc<Console>,
        memory: Arc<MemoryStore>,
    }

    /// Kernel over inert hardware: no threads, disks serviced by hand.
    fn fixture(num_cpus: usize, slice: u32) -> Fixture {
        fixture_with_sink(num_cpus, slice, Arc::new(LogSink))
    }

    fn fixture_with_sink(num_cpus: usize, slice: u32, events: Arc<dyn EventSink>) -> Fixture {
        let config = Config {
            num_cpus,
            min_slice: slice,
            max_slice: slice,
            partition_size: 16,
            num_partitions: 6,
            ..Config::default()
        };
        let mailbox = Arc::new(InterruptMailbox::new());
        let memory = Arc::new(MemoryStore::new(
            config.partition_size,
            config.num_partitions,
        ));
        let cpus: Vec<_> = (0..num_cpus).map(|id| Arc::new(CpuContext::new(id))).collect();
        let mmus: Vec<_> = cpus
            .iter()
            .map(|_| Arc::new(Mmu::new(memory.clone(), mailbox.clone())))
            .collect();
        let disks: Vec<_> = (0..2).map(|id| Arc::new(DiskUnit::new(id, 64))).collect();
        for disk in &disks {
            // A three-word program image at address 4.
            let mut image = vec![0; 4];
            image.extend([7, 8, 9, SENTINEL]);
            disk.load_image(&image);
        }
        let console = Arc::new(Console::new());
        let kernel = Arc::new(Kernel::new(
            &config,
            memory.clone(),
            console.clone(),
            events,
            cpus,
            mmus,
            disks.clone(),
        ));
        Fixture {
            kernel,
            disks,
            console,
            memory,
        }
    }

    /// Push one console load command through to the ready queue.
    fn admit(fx: &Fixture, disk: usize, address: usize) {
        fx.console.push_line(format!("{disk} {address}"));
        fx.kernel.handle(interrupt::CONSOLE, 0);
        assert!(fx.disks[disk].service_one());
        fx.kernel.handle(interrupt::DISK_BASE + disk as u32, 0);
    }

    fn assert_conserved(kernel: &Kernel) {
        let snap = kernel.snapshot();
        let live = snap.ready.len()
            + snap.running.iter().filter(|pid| **pid != 0).count()
            + snap.disk_waits.iter().map(Vec::len).sum::<usize>();
        assert_eq!(live as u64, snap.created - snap.terminated);
    }

    #[test]
    fn test_kernel_starts_idle_everywhere() {
        let fx = fixture(2, 1);
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.running, vec![0, 0]);
        assert!(snap.ready.is_empty());
        assert_eq!(snap.partitions[0], PartitionState::System);
        assert_eq!(snap.partitions[1], PartitionState::System);
    }

    #[test]
    fn test_kernel_console_load_creates_waiting_process() {
        let fx = fixture(1, 1);
        fx.console.push_line("0 4".to_string());
        fx.kernel.handle(interrupt::CONSOLE, 0);
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.created, 1);
        assert_eq!(snap.disk_waits[0], vec![2]);
        assert_eq!(snap.partitions[2], PartitionState::Used);
        assert!(snap.ready.is_empty());
        assert_conserved(&fx.kernel);
    }

    #[test]
    fn test_kernel_disk_completion_installs_image_and_readies_process() {
        let fx = fixture(1, 1);
        admit(&fx, 0, 4);
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.ready, vec![2]);
        assert!(snap.disk_waits[0].is_empty());
        // Partition 2 holds the loaded words.
        let base = 2 * fx.memory.partition_size();
        assert_eq!(fx.memory.super_read(base), 7);
        assert_eq!(fx.memory.super_read(base + 1), 8);
        assert_eq!(fx.memory.super_read(base + 2), 9);
        assert_conserved(&fx.kernel);
    }

    #[test]
    fn test_kernel_console_rejects_malformed_entries() {
        let fx = fixture(1, 1);
        for line in ["", "zero", "0", "0 four", "9 4", "-1 4"] {
            fx.console.push_line(line.to_string());
            fx.kernel.handle(interrupt::CONSOLE, 0);
        }
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.created, 0);
        assert!(snap.disk_waits[0].is_empty());
        assert!(snap.disk_waits[1].is_empty());
    }

    #[test]
    fn test_kernel_load_failure_frees_partition() {
        let fx = fixture(1, 1);
        // Address 60 scans off the end of the 64-word disk: MissingEof.
        fx.console.push_line("0 60".to_string());
        fx.kernel.handle(interrupt::CONSOLE, 0);
        assert!(fx.disks[0].service_one());
        fx.kernel.handle(interrupt::DISK_BASE, 0);
        let snap = fx.kernel.snapshot();
        assert!(snap.ready.is_empty());
        assert_eq!(snap.partitions[2], PartitionState::Free);
        assert_eq!(snap.terminated, 1);
        assert_conserved(&fx.kernel);
    }

    #[test]
    fn test_kernel_rejects_creation_when_partitions_exhausted() {
        let fx = fixture(1, 1);
        for _ in 0..4 {
            admit(&fx, 0, 4);
        }
        let before = fx.kernel.snapshot();
        assert_eq!(before.created, 4);
        fx.console.push_line("0 4".to_string());
        fx.kernel.handle(interrupt::CONSOLE, 0);
        let after = fx.kernel.snapshot();
        assert_eq!(after.created, 4);
        assert!(after.disk_waits[0].is_empty());
        assert_conserved(&fx.kernel);
    }

    #[test]
    fn test_kernel_partition_exclusivity() {
        let fx = fixture(1, 1);
        for _ in 0..4 {
            admit(&fx, 0, 4);
        }
        // Kill one and admit a replacement: the freed partition is reused
        // and no two live processes ever share one.
        fx.kernel.handle(interrupt::TIMER, 0);
        fx.kernel.handle(interrupt::EXIT, 0);
        admit(&fx, 0, 4);

        let state = fx.kernel.state.lock().unwrap();
        let mut held: Vec<usize> = state
            .ready
            .iter()
            .chain(state.running.iter().filter(|proc| !proc.is_idle()))
            .map(ProcessRecord::partition)
            .collect();
        held.sort_unstable();
        held.dedup();
        assert_eq!(held.len(), 4);
        for partition in held {
            assert_eq!(state.partitions[partition], PartitionState::Used);
        }
    }

    #[test]
    fn test_kernel_timer_round_robin_fifo_order() {
        let fx = fixture(1, 1);
        for _ in 0..3 {
            admit(&fx, 0, 4);
        }
        assert_eq!(fx.kernel.snapshot().ready, vec![2, 3, 4]);

        // Idle is replaced by the FIFO head on the first tick, then each
        // tick retires exactly one slice in arrival order.
        let mut seen = Vec::new();
        for _ in 0..4 {
            fx.kernel.handle(interrupt::TIMER, 0);
            seen.push(fx.kernel.snapshot().running[0]);
        }
        assert_eq!(seen, vec![2, 3, 4, 2]);
        assert_conserved(&fx.kernel);
    }

    #[test]
    fn test_kernel_slice_counts_timer_ticks() {
        let fx = fixture(1, 2);
        admit(&fx, 0, 4);
        admit(&fx, 0, 4);
        fx.kernel.handle(interrupt::TIMER, 0);
        assert_eq!(fx.kernel.snapshot().running[0], 2);
        // Slice of 2: the first tick only decrements, the second evicts.
        fx.kernel.handle(interrupt::TIMER, 0);
        assert_eq!(fx.kernel.snapshot().running[0], 2);
        fx.kernel.handle(interrupt::TIMER, 0);
        assert_eq!(fx.kernel.snapshot().running[0], 3);
        assert_eq!(fx.kernel.snapshot().ready, vec![2]);
    }

    #[test]
    fn test_stepped_clock_drives_deterministic_eviction() {
        use crate::hardware::Clock;
        use std::time::Duration;

        let fx = fixture(1, 1);
        admit(&fx, 0, 4);
        admit(&fx, 0, 4);

        let mailbox = Arc::new(InterruptMailbox::new());
        let clock = Clock::new(Duration::from_millis(1), 2, Some(mailbox.clone()));
        clock.pause();
        clock.step();
        assert_eq!(mailbox.take_next(), None);
        clock.step();
        let code = mailbox.take_next().unwrap();
        fx.kernel.handle(code, 0);
        assert_eq!(fx.kernel.snapshot().running[0], 2);

        clock.step();
        clock.step();
        fx.kernel.handle(mailbox.take_next().unwrap(), 0);
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.running[0], 3);
        assert_eq!(snap.ready, vec![2]);
    }

    #[test]
    fn test_kernel_timer_fills_every_cpu() {
        let fx = fixture(2, 1);
        admit(&fx, 0, 4);
        admit(&fx, 0, 4);
        fx.kernel.handle(interrupt::TIMER, 0);
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.running, vec![2, 3]);
        assert!(snap.ready.is_empty());
        assert_conserved(&fx.kernel);
    }

    #[test]
    fn test_kernel_exit_frees_partition_and_refills_cpu() {
        let fx = fixture(1, 1);
        admit(&fx, 0, 4);
        admit(&fx, 0, 4);
        fx.kernel.handle(interrupt::TIMER, 0);
        assert_eq!(fx.kernel.snapshot().running[0], 2);
        fx.kernel.handle(interrupt::EXIT, 0);
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.running[0], 3);
        assert_eq!(snap.terminated, 1);
        assert_eq!(snap.partitions[2], PartitionState::Free);
        assert_conserved(&fx.kernel);
    }

    #[test]
    fn test_kernel_fault_kills_offender_only() {
        let fx = fixture(2, 1);
        admit(&fx, 0, 4);
        admit(&fx, 0, 4);
        fx.kernel.handle(interrupt::TIMER, 0);
        fx.kernel.handle(interrupt::PROTECTION_FAULT, 1);
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.running, vec![2, 0]);
        assert_eq!(snap.terminated, 1);
        assert_conserved(&fx.kernel);
    }

    #[test]
    fn test_kernel_illegal_instruction_kills() {
        let fx = fixture(1, 1);
        admit(&fx, 0, 4);
        fx.kernel.handle(interrupt::TIMER, 0);
        fx.kernel.handle(interrupt::ILLEGAL_INSTRUCTION, 0);
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.running[0], 0);
        assert_eq!(snap.terminated, 1);
    }

    #[test]
    fn test_kernel_disk_backlog_completes_in_submission_order() {
        let fx = fixture(1, 1);
        for _ in 0..3 {
            fx.console.push_line("0 4".to_string());
            fx.kernel.handle(interrupt::CONSOLE, 0);
        }
        assert_eq!(fx.kernel.snapshot().disk_waits[0], vec![2, 3, 4]);
        for expected in [vec![2], vec![2, 3], vec![2, 3, 4]] {
            assert!(fx.disks[0].service_one());
            fx.kernel.handle(interrupt::DISK_BASE, 0);
            assert_eq!(fx.kernel.snapshot().ready, expected);
        }
        assert!(!fx.disks[0].service_one());
        assert_conserved(&fx.kernel);
    }

    #[test]
    fn test_kernel_unknown_interrupt_changes_nothing() {
        let fx = fixture(1, 1);
        admit(&fx, 0, 4);
        let before = fx.kernel.snapshot();
        fx.kernel.handle(99, 0);
        let after = fx.kernel.snapshot();
        assert_eq!(before.ready, after.ready);
        assert_eq!(before.created, after.created);
    }

    #[test]
    fn test_kernel_spurious_disk_completion_is_contained() {
        let fx = fixture(1, 1);
        fx.kernel.handle(interrupt::DISK_BASE, 0);
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.created, 0);
        assert!(snap.ready.is_empty());
    }

    /// Install pid 2 on cpu 0 and return it ready for syscall testing.
    fn with_running_process(fx: &Fixture) {
        admit(fx, 0, 4);
        fx.kernel.handle(interrupt::TIMER, 0);
        assert_eq!(fx.kernel.snapshot().running[0], 2);
    }

    fn set_args(fx: &Fixture, r1: i32, r2: i32, r3: i32) {
        let mut regs = fx.kernel.cpus[0].registers();
        regs.gpr[1] = r1;
        regs.gpr[2] = r2;
        regs.gpr[3] = r3;
    }

    fn result_regs(fx: &Fixture) -> (i32, i32) {
        let regs = fx.kernel.cpus[0].registers();
        (regs.gpr[0], regs.gpr[1])
    }

    #[test]
    fn test_kernel_open_invalid_args_do_not_block() {
        let fx = fixture(1, 1);
        with_running_process(&fx);
        set_args(&fx, 7, 0, 4);
        fx.kernel.handle(interrupt::OPEN, 0);
        assert_eq!(fx.kernel.snapshot().running[0], 2);
        assert_eq!(result_regs(&fx).0, STATUS_INVALID);

        set_args(&fx, 1, 5, 4);
        fx.kernel.handle(interrupt::OPEN, 0);
        assert_eq!(result_regs(&fx).0, STATUS_INVALID);

        set_args(&fx, 1, 0, 4096);
        fx.kernel.handle(interrupt::OPEN, 0);
        assert_eq!(result_regs(&fx).0, STATUS_INVALID);
        assert_conserved(&fx.kernel);
    }

    #[test]
    fn test_kernel_open_read_discovers_size() {
        let fx = fixture(1, 1);
        with_running_process(&fx);
        set_args(&fx, 1, 1, 4);
        fx.kernel.handle(interrupt::OPEN, 0);
        let snap = fx.kernel.snapshot();
        assert_eq!(snap.running[0], 0);
        assert_eq!(snap.disk_waits[1], vec![2]);

        assert!(fx.disks[1].service_one());
        fx.kernel.handle(interrupt::DISK_BASE + 1, 0);
        assert_eq!(fx.kernel.snapshot().ready, vec![2]);

        let state = fx.kernel.state.lock().unwrap();
        let proc = state.ready.front().unwrap();
        assert_eq!(proc.gpr[0], STATUS_OK);
        let file = proc.gpr[1] as u32;
        let handle = proc.file(file).unwrap();
        assert_eq!(handle.size, 3);
        assert_eq!(handle.cursor, 0);
    }

    #[test]
    fn test_kernel_open_read_error_removes_handle() {
        let fx = fixture(1, 1);
        with_running_process(&fx);
        // Address 60 has no sentinel before the disk end.
        set_args(&fx, 1, 1, 60);
        fx.kernel.handle(interrupt::OPEN, 0);
        assert!(fx.disks[1].service_one());
        fx.kernel.handle(interrupt::DISK_BASE + 1, 0);

        let state = fx.kernel.state.lock().unwrap();
        let proc = state.ready.front().unwrap();
        assert_eq!(proc.gpr[0], STATUS_INVALID);
        assert!(proc.file(0).is_none());
    }

    #[test]
    fn test_kernel_get_reads_words_then_eof() {
        let fx = fixture(1, 1);
        with_running_process(&fx);
        set_args(&fx, 1, 1, 4);
        fx.kernel.handle(interrupt::OPEN, 0);
        assert!(fx.disks[1].service_one());
        fx.kernel.handle(interrupt::DISK_BASE + 1, 0);
        fx.kernel.handle(interrupt::TIMER, 0);
        let file = result_regs(&fx).1;

        for expected in [7, 8, 9] {
            set_args(&fx, file, 0, 0);
            fx.kernel.handle(interrupt::GET, 0);
            assert!(fx.disks[1].service_one());
            fx.kernel.handle(interrupt::DISK_BASE + 1, 0);
            fx.kernel.handle(interrupt::TIMER, 0);
            let (status, value) = result_regs(&fx);
            assert_eq!(status, STATUS_OK);
            assert_eq!(value, expected);
        }

        set_args(&fx, file, 0, 0);
        fx.kernel.handle(interrupt::GET, 0);
        // EOF answers immediately, without touching the disk.
        assert_eq!(fx.kernel.snapshot().running[0], 2);
        assert_eq!(result_regs(&fx).0, STATUS_EOF);
        assert!(!fx.disks[1].service_one());
    }

    #[test]
    fn test_kernel_get_invalid_handle_does_not_block() {
        let fx = fixture(1, 1);
        with_running_process(&fx);
        set_args(&fx, 3, 0, 0);
        fx.kernel.handle(interrupt::GET, 0);
        assert_eq!(fx.kernel.snapshot().running[0], 2);
        assert_eq!(result_regs(&fx).0, STATUS_INVALID);
    }

    #[test]
    fn test_kernel_put_writes_and_extends_file() {
        let fx = fixture(1, 1);
        with_running_process(&fx);
        set_args(&fx, 0, 0, 40);
        fx.kernel.handle(interrupt::OPEN, 0);
        assert!(fx.disks[0].service_one());
        fx.kernel.handle(interrupt::DISK_BASE, 0);
        fx.kernel.handle(interrupt::TIMER, 0);
        let (status, file) = result_regs(&fx);
        assert_eq!(status, STATUS_OK);

        set_args(&fx, file, 65, 0);
        fx.kernel.handle(interrupt::PUT, 0);
        assert!(fx.disks[0].service_one());
        fx.kernel.handle(interrupt::DISK_BASE, 0);
        fx.kernel.handle(interrupt::TIMER, 0);
        assert_eq!(result_regs(&fx).0, STATUS_OK);

        {
            let state = fx.kernel.state.lock().unwrap();
            let handle = state.running[0].file(file as u32).unwrap();
            assert_eq!((handle.cursor, handle.size), (1, 1));
        }

        // The word really landed on the disk.
        fx.disks[0].submit(DiskRequest {
            op: DiskOp::Read,
            address: 40,
            data: 0,
        });
        assert!(fx.disks[0].service_one());
        assert_eq!(fx.disks[0].data(0), 65);
    }

    #[test]
    fn test_kernel_put_on_read_file_rejected() {
        let fx = fixture(1, 1);
        with_running_process(&fx);
        set_args(&fx, 1, 1, 4);
        fx.kernel.handle(interrupt::OPEN, 0);
        assert!(fx.disks[1].service_one());
        fx.kernel.handle(interrupt::DISK_BASE + 1, 0);
        fx.kernel.handle(interrupt::TIMER, 0);
        let file = result_regs(&fx).1;

        set_args(&fx, file, 65, 0);
        fx.kernel.handle(interrupt::PUT, 0);
        assert_eq!(fx.kernel.snapshot().running[0], 2);
        assert_eq!(result_regs(&fx).0, STATUS_INVALID);
    }

    #[test]
    fn test_kernel_close_removes_handle() {
        let fx = fixture(1, 1);
        with_running_process(&fx);
        set_args(&fx, 0, 0, 40);
        fx.kernel.handle(interrupt::OPEN, 0);
        assert!(fx.disks[0].service_one());
        fx.kernel.handle(interrupt::DISK_BASE, 0);
        fx.kernel.handle(interrupt::TIMER, 0);
        let file = result_regs(&fx).1;

        set_args(&fx, file, 0, 0);
        fx.kernel.handle(interrupt::CLOSE, 0);
        assert_eq!(result_regs(&fx).0, STATUS_OK);
        set_args(&fx, file, 0, 0);
        fx.kernel.handle(interrupt::CLOSE, 0);
        assert_eq!(result_regs(&fx).0, STATUS_INVALID);
    }

    #[test]
    fn test_kernel_print_emits_register_bytes() {
        #[derive(Default)]
        struct CaptureSink {
            output: Mutex<Vec<String>>,
        }

        impl EventSink for CaptureSink {
            fn process_added(&self, _queue: &str, _pid: Pid) {}
            fn process_removed(&self, _queue: &str, _pid: Pid) {}
            fn interrupt(&self, _cpu: usize, _code: u32) {}
            fn program_output(&self, text: &str) {
                self.output.lock().unwrap().push(text.to_string());
            }
        }

        let sink = Arc::new(CaptureSink::default());
        let fx = fixture_with_sink(1, 1, sink.clone());
        with_running_process(&fx);
        set_args(&fx, 0x0102_0304, 0, 0);
        fx.kernel.handle(interrupt::PRINT, 0);
        assert_eq!(*sink.output.lock().unwrap(), vec!["1 2 3 4".to_string()]);
    }
}
