//! The child monitor: one global thread that reaps exited children,
//! applies each terminal's exit action after its autoclose grace period,
//! and drives the throttle drain timer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::listener::Listener;

/// Reap/drain poll interval.
const MONITOR_INTERVAL: Duration = Duration::from_millis(250);

/// How an exited terminal is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    Close,
    Keep,
    Restart,
}

impl ExitAction {
    pub fn parse(s: &str) -> ExitAction {
        match s {
            "keep" => ExitAction::Keep,
            "restart" => ExitAction::Restart,
            _ => ExitAction::Close,
        }
    }
}

/// Run until the listener shuts down.
pub fn run_monitor(listener: Arc<Listener>) {
    let action = ExitAction::parse(&listener.config().server.exit_action);
    let autoclose = listener.config().autoclose();
    let command = listener.config().emulator.command.clone();
    let environment = listener.config().emulator.environment.clone();

    while !listener.is_shutting_down() {
        std::thread::sleep(MONITOR_INTERVAL);

        for term in listener.terms() {
            // Reap
            if let Some(status) = term.try_reap() {
                term.mark_exited(status);
            }

            // Autoclose
            if let Some(record) = term.exit_record() {
                let expired = record
                    .at
                    .map(|at| at.elapsed() >= autoclose)
                    .unwrap_or(true);
                if !expired {
                    continue;
                }

                match action {
                    ExitAction::Keep => {}
                    ExitAction::Close => {
                        info!(term = %term.id.short(), "autoclose expired");
                        listener.destroy_term(
                            &term.id,
                            core_wire::StatusCode::Closed as u32,
                        );
                    }
                    ExitAction::Restart => {
                        info!(term = %term.id.short(), "restarting child");
                        if let Err(err) = term.restart_child(&command, &environment) {
                            warn!(term = %term.id.short(), %err, "restart failed");
                            listener.destroy_term(
                                &term.id,
                                core_wire::StatusCode::Closed as u32,
                            );
                        }
                    }
                }
            }

            // Throttled watcher drain
            term.drain_throttled();
        }
    }
}
