use crate::kernel::process::Pid;

/// Observer interface for the excluded visualization collaborators. The
/// kernel and queues call it polymorphically; production wires in `LogSink`,
/// tests wire in recording sinks.
pub trait EventSink: Send + Sync {
    /// A process entered the named queue.
    fn process_added(&self, queue: &str, pid: Pid);
    /// A process left the named queue.
    fn process_removed(&self, queue: &str, pid: Pid);
    /// An interrupt reached the kernel dispatch entry.
    fn interrupt(&self, cpu: usize, code: u32);
    /// Decoration-free output from a PRINT syscall.
    fn program_output(&self, text: &str);
}

/// Default sink: queue traffic and interrupts go to the log, program output
/// goes straight to stdout.
pub struct LogSink;

impl EventSink for LogSink {
    fn process_added(&self, queue: &str, pid: Pid) {
        log::debug!("[{queue}] + pid {pid}");
    }

    fn process_removed(&self, queue: &str, pid: Pid) {
        log::debug!("[{queue}] - pid {pid}");
    }

    fn interrupt(&self, cpu: usize, code: u32) {
        log::debug!("int {code} on cpu {cpu}");
    }

    fn program_output(&self, text: &str) {
        println!("{text}");
    }
}
