//! Command implementations
//!
//! User-facing output goes to stdout; diagnostics go through the logger.

use anyhow::{Context, Result};
use can_sim_core::{CanMessage, FloodEngine, MetricsCollector, SimulatorCore};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;
use std::io::{self, BufRead};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_TIMEOUT_MS: u16 = 100;

/// Print one variable, with signal and message details in the log
fn print_variable(core: &SimulatorCore, name: &str, details: bool) {
    let (Some(signal), Some(message)) = (core.signal(name), core.message(name)) else {
        log::warn!("Variable '{}' not found", name);
        return;
    };
    println!("{}", name);
    log::info!("{}{}", signal.describe(details), message.describe(details));
}

/// Print the named variables, or every variable when `names` is empty
pub fn list_variables(core: &SimulatorCore, names: &[String], versions: bool) {
    if !names.is_empty() {
        for name in names {
            print_variable(core, name, true);
        }
        return;
    }
    if versions {
        println!("cfg version: {}", core.cfg_version());
        println!("dbc version: {}\n", core.dbc_version());
    }
    for name in core.variables() {
        print_variable(core, &name, false);
    }
}

/// Print `VAR=VALUE` for every changed signal of a received message
fn print_changed_signals(message: &CanMessage) {
    for signal in message.signals().filter(|signal| signal.is_modified()) {
        if !signal.variable_name().is_empty() {
            println!("{}={}", signal.variable_name(), signal.value());
        }
        log::info!("{}", signal.describe(false).trim_end());
    }
}

/// Handle one line of user input (or the `send` parameters)
pub fn process_user_input(core: &SimulatorCore, input: &[String], running: &AtomicBool) {
    let Some(command) = input.first() else {
        return;
    };
    match command.as_str() {
        "reset" => core.set_default_values(true),
        "quit" | "exit" => running.store(false, Ordering::SeqCst),
        "list" => list_variables(core, &input[1..], false),
        _ => {
            core.set_values(input);
        }
    }
}

/// True if a polled descriptor has data or was hung up
fn is_readable(fd: Option<&PollFd>) -> bool {
    fd.and_then(|fd| fd.revents())
        .is_some_and(|events| events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
}

/// Wait on stdin (if `interactive`) and the incoming message queue until
/// `running` is cleared
pub fn main_loop(core: &SimulatorCore, running: &AtomicBool, interactive: bool) -> Result<()> {
    let stdin = io::stdin();
    let mut read_stdin = interactive;

    while running.load(Ordering::SeqCst) {
        let (stdin_ready, queue_ready) = {
            let mut fds = Vec::with_capacity(2);
            if read_stdin {
                fds.push(PollFd::new(stdin.as_fd(), PollFlags::POLLIN));
            }
            if let Some(fd) = core.message_queue().event_fd() {
                fds.push(PollFd::new(fd, PollFlags::POLLIN));
            }

            match poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS)) {
                Ok(0) | Err(Errno::EINTR) => continue,
                Ok(_) => {}
                Err(e) => return Err(e).context("Failed to wait for input"),
            }

            if read_stdin {
                (is_readable(fds.first()), is_readable(fds.get(1)))
            } else {
                (false, is_readable(fds.first()))
            }
        };

        if !running.load(Ordering::SeqCst) {
            break;
        }

        if stdin_ready {
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                log::debug!("End of input, no longer reading stdin");
                read_stdin = false;
            } else {
                let input: Vec<String> = line.split_whitespace().map(str::to_string).collect();
                process_user_input(core, &input, running);
            }
        }

        if queue_ready {
            let queue = core.message_queue();
            queue.clear_event();
            while let Some(message) = queue.try_pop() {
                print_changed_signals(&message);
            }
        }
    }
    Ok(())
}

/// Flood until `running` is cleared, returning the number of sent messages
pub fn flood(
    core: &SimulatorCore,
    params: &[String],
    running: &AtomicBool,
    metrics: Option<Arc<Mutex<MetricsCollector>>>,
) -> can_sim_core::Result<u64> {
    let mut flood = FloodEngine::new(core, params)?;
    if let Some(metrics) = metrics {
        flood.init_metrics(metrics);
    }

    let mut sent = 0;
    while running.load(Ordering::SeqCst) {
        if flood.flood_signal() {
            sent += 1;
        }
    }
    Ok(sent)
}

/// Replay the recording until it ends or `running` is cleared
pub fn simulate(core: &mut SimulatorCore, running: &AtomicBool) -> bool {
    if !core.start_data_simulator() {
        log::error!("No recording to simulate");
        return false;
    }
    while running.load(Ordering::SeqCst) && core.is_data_simulator_running() {
        thread::sleep(Duration::from_millis(POLL_TIMEOUT_MS as u64));
    }
    core.stop_data_simulator();
    core.wait_data_simulator();
    true
}

/// Collect the final counters and write the metrics file
pub fn write_metrics(core: &SimulatorCore, metrics: &Mutex<MetricsCollector>, base: &str) -> Result<()> {
    let path = can_sim_core::metrics_file_name(base);
    let mut metrics = metrics.lock();
    metrics.update_errors(core.error_metrics());
    metrics.update_messages(core.messages().iter());
    metrics
        .write_to_file(&path)
        .with_context(|| format!("Failed to write metrics file: {:?}", path))?;
    log::info!("Metrics written to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::eventfd::EventFd;

    #[test]
    fn test_is_readable_after_poll() {
        let event = EventFd::new().unwrap();
        {
            let mut fds = [PollFd::new(event.as_fd(), PollFlags::POLLIN)];
            assert_eq!(poll(&mut fds, PollTimeout::ZERO).unwrap(), 0);
            assert!(!is_readable(fds.first()));
        }

        event.write(1).unwrap();
        let mut fds = [PollFd::new(event.as_fd(), PollFlags::POLLIN)];
        assert_eq!(poll(&mut fds, PollTimeout::ZERO).unwrap(), 1);
        assert!(is_readable(fds.first()));
        assert!(!is_readable(None));
    }

    #[test]
    fn test_quit_clears_running() {
        let running = AtomicBool::new(true);
        let core = SimulatorCore::new(
            &can_sim_core::SimulatorSources::live(
                concat!(env!("CARGO_MANIFEST_DIR"), "/../can-sim-core/tests/fixtures/tests.dbc"),
                concat!(env!("CARGO_MANIFEST_DIR"), "/../can-sim-core/tests/fixtures/tests.json"),
            ),
            None,
            can_sim_core::SimulatorConfig::new(),
        )
        .unwrap();

        process_user_input(&core, &["test1sig1=5".to_string()], &running);
        assert_eq!(core.signal("test1sig1").unwrap().value(), can_sim_core::Value::Integer(5));
        assert!(running.load(Ordering::SeqCst));

        process_user_input(&core, &["quit".to_string()], &running);
        assert!(!running.load(Ordering::SeqCst));
    }
}
