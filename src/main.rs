use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Result;

use multicore_os_simulator::config::Config;
use multicore_os_simulator::events::LogSink;
use multicore_os_simulator::kernel::Driver;

fn main() -> Result<()> {
    env_logger::init();

    let mut config = Config::default();
    if let Some(path) = std::env::args().nth(1) {
        let path = PathBuf::from(path);
        config.disk_images = vec![path.clone(), path];
    }

    let mut driver = Driver::new(config, Arc::new(LogSink))?;
    driver.start();
    println!("machine running; type '<disk> <address>' to load a program");

    // The machine lives in its threads; the main thread just stays out of
    // the way until the user kills the process.
    loop {
        thread::park();
    }
}
