use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::hardware::interrupts::{InterruptMailbox, CONSOLE};

/// The intelligent terminal: buffers whole command lines for the kernel to
/// drain, one per console interrupt.
pub struct Console {
    lines: Mutex<VecDeque<String>>,
}

impl Console {
    pub fn new() -> Console {
        Console {
            lines: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_line(&self, line: String) {
        self.lines.lock().unwrap().push_back(line);
    }

    pub fn take_line(&self) -> Option<String> {
        self.lines.lock().unwrap().pop_front()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener thread: each stdin line is buffered and code 15 raised. Exits
/// when stdin closes.
pub fn start_listener(console: Arc<Console>, mailbox: Arc<InterruptMailbox>) -> JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    console.push_line(line);
                    mailbox.raise(CONSOLE);
                }
                Err(err) => {
                    log::warn!("console listener stopping: {err}");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_lines_drain_in_order() {
        let console = Console::new();
        console.push_line("0 4".to_string());
        console.push_line("1 9".to_string());
        assert_eq!(console.take_line().as_deref(), Some("0 4"));
        assert_eq!(console.take_line().as_deref(), Some("1 9"));
        assert_eq!(console.take_line(), None);
    }
}
