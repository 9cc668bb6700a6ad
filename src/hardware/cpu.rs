use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use super::clock::Clock;
use super::interrupts::{InterruptMailbox, ILLEGAL_INSTRUCTION};
use super::memory::Mmu;
use crate::kernel::Kernel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub zero: bool,
    pub equal: bool,
    pub less: bool,
}

#[derive(Debug, Clone)]
pub struct RegisterFile {
    pub pc: usize,
    pub gpr: [i32; 16],
    pub flags: Flags,
}

impl RegisterFile {
    pub fn new() -> RegisterFile {
        RegisterFile {
            pc: 0,
            gpr: [0; 16],
            flags: Flags::default(),
        }
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared face of one CPU. The register file has its own lock so the
/// kernel can save and restore context while the CPU thread runs; the gate
/// is held by the CPU for the span of one instruction and taken by the
/// kernel to hold the CPU at an instruction boundary while evicting it.
pub struct CpuContext {
    id: usize,
    regs: Mutex<RegisterFile>,
    gate: Mutex<()>,
}

impl CpuContext {
    pub fn new(id: usize) -> CpuContext {
        CpuContext {
            id,
            regs: Mutex::new(RegisterFile::new()),
            gate: Mutex::new(()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn registers(&self) -> MutexGuard<'_, RegisterFile> {
        self.regs.lock().unwrap()
    }

    pub fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap()
    }
}

fn reg(byte: u8) -> Result<usize, u32> {
    if byte < 16 {
        Ok(byte as usize)
    } else {
        Err(ILLEGAL_INSTRUCTION)
    }
}

/// Run one decoded instruction. `Err(code)` is a synchronous trap: either
/// `INT n` or an unrecognized byte pattern.
fn run_instruction(regs: &mut RegisterFile, mmu: &Mmu, ir: [u8; 4]) -> Result<(), u32> {
    let d = ir[3];
    match (ir[0], ir[1], ir[2]) {
        (b'L', b'M', r) => regs.gpr[reg(r)?] = mmu.read(d as usize) as i32,
        (b'L', b'C', r) => regs.gpr[reg(r)?] = d as i32,
        (b'W', b'M', r) => mmu.write(d as usize, regs.gpr[reg(r)?] as u32),
        (b'S', b'U', r) => {
            regs.gpr[reg(r)?] = regs.gpr[reg(r)?].wrapping_sub(regs.gpr[reg(d)?])
        }
        (b'A', b'D', r) => {
            regs.gpr[reg(r)?] = regs.gpr[reg(r)?].wrapping_add(regs.gpr[reg(d)?])
        }
        (b'D', b'E', b'C') => regs.gpr[reg(d)?] = regs.gpr[reg(d)?].wrapping_sub(1),
        (b'I', b'N', b'C') => regs.gpr[reg(d)?] = regs.gpr[reg(d)?].wrapping_add(1),
        (b'C', b'P', r) => {
            let lhs = regs.gpr[reg(r)?];
            let rhs = regs.gpr[reg(d)?];
            regs.flags.zero = lhs == 0;
            regs.flags.equal = lhs == rhs;
            regs.flags.less = lhs < rhs;
        }
        (b'J', b'P', b'A') => regs.pc = d as usize,
        (b'J', b'P', b'Z') => {
            if regs.flags.zero {
                regs.pc = d as usize;
            }
        }
        (b'J', b'P', b'E') => {
            if regs.flags.equal {
                regs.pc = d as usize;
            }
        }
        (b'J', b'P', b'L') => {
            if regs.flags.less {
                regs.pc = d as usize;
            }
        }
        (b'I', b'N', b'T') => return Err(d as u32),
        _ => return Err(ILLEGAL_INSTRUCTION),
    }
    Ok(())
}

/// One fetch-decode-execute cycle against the CPU's MMU view of memory.
/// Returns a trap code to be delivered to the kernel, if any.
fn cycle(ctx: &CpuContext, mmu: &Mmu) -> Option<u32> {
    let mut regs = ctx.registers();
    // A faulted fetch already queued code 3; skip the cycle rather than
    // execute a phantom zero word.
    let Some(word) = mmu.fetch(regs.pc) else {
        return None;
    };
    let ir = word.to_be_bytes();
    regs.pc += 1;
    run_instruction(&mut regs, mmu, ir).err()
}

/// Spawn the fetch-execute loop for one CPU. Synchronous traps and polled
/// mailbox interrupts both enter the kernel outside the gate, so the kernel
/// may take any CPU's gate without risking deadlock against dispatch.
pub fn start_processor(
    ctx: Arc<CpuContext>,
    mmu: Arc<Mmu>,
    clock: Arc<Clock>,
    mailbox: Arc<InterruptMailbox>,
    kernel: Arc<Kernel>,
    cycle_ticks: u64,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        clock.sleep(cycle_ticks);
        let trap = {
            let _gate = ctx.gate();
            cycle(&ctx, &mmu)
        };
        if let Some(code) = trap {
            kernel.handle(code, ctx.id());
        }
        if let Some(code) = mailbox.take_next() {
            kernel.handle(code, ctx.id());
        }
    })
}
