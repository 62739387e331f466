//! A terminal session: one emulator, one pty, the subscribed watchers, and
//! the thread that ties them together.
//!
//! The pty thread is the only writer of emulator state. It blocks in poll
//! on the pty master and the wake pipe of its command queue; commands from
//! reader threads are applied between bursts, and every mutation ends with
//! an emission walk over the watchers. The state mutex carries a writeable
//! marker so read-side acquisitions can be audited.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use core_buffer::{Point, Region, Size};
use core_cells::{RegionId, ResetFlags};
use core_emu::{EmulatorOptions, XtermEmulator};
use core_wire::Id;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::emission;
use crate::pty::{PtyProcess, WakePipe, poll_readable};
use crate::watch::{WatchState, Watcher};
use crate::writer::THROTTLE_THRESHOLD;

/// Size of one pty read.
const TERM_BUFSIZE: usize = 65536;

/// Commands delivered to the pty thread from readers and the monitor.
#[derive(Debug)]
pub enum TermCommand {
    Input(Vec<u8>),
    Resize(Size),
    BufferResize { bufid: u8, caporder: u8 },
    Reset(ResetFlags),
    MouseMove(Point),
    MouseEvent { event: u32, x: u32, y: u32 },
    SetAttribute { key: String, value: String },
    RemoveAttribute(String),
    CreateUserRegion { bufid: u8, region: Box<Region> },
    RemoveUserRegion { bufid: u8, region: RegionId },
    /// Re-walk throttled watchers.
    Drain,
    Stop,
}

impl TermCommand {
    /// Commands that still run while the thread is stopping.
    fn must_run(&self) -> bool {
        matches!(
            self,
            TermCommand::SetAttribute { .. }
                | TermCommand::RemoveAttribute(_)
                | TermCommand::Stop
        )
    }
}

/// Exit bookkeeping filled in by the child monitor.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitRecord {
    pub status: i32,
    pub at: Option<Instant>,
}

pub struct TermInstance {
    pub id: Id,
    pub owner: Id,

    state: Mutex<XtermEmulator>,
    state_writer: AtomicBool,

    watchers: Mutex<Vec<Arc<Watcher>>>,
    pty: Mutex<PtyProcess>,

    cmd_tx: Sender<TermCommand>,
    cmd_rx: Receiver<TermCommand>,
    wake: WakePipe,

    started: Instant,
    stopping: AtomicBool,
    exited: Mutex<Option<ExitRecord>>,
    closed: AtomicBool,
}

/// State-lock guard carrying the writeable marker.
pub struct StateLock<'a> {
    pub emulator: MutexGuard<'a, XtermEmulator>,
    writer: bool,
    owner: &'a TermInstance,
}

impl Drop for StateLock<'_> {
    fn drop(&mut self) {
        if self.writer {
            self.owner.state_writer.store(false, Ordering::Release);
        }
    }
}

impl TermInstance {
    pub fn new(
        id: Id,
        owner: Id,
        size: Size,
        options: &EmulatorOptions,
        command: &[String],
        environment: &[String],
        dir: Option<&str>,
    ) -> std::io::Result<Arc<TermInstance>> {
        let pty = PtyProcess::spawn(command, environment, dir, size)?;
        let (cmd_tx, cmd_rx) = unbounded();

        let mut emulator = XtermEmulator::new(size, options);
        emulator.set_attribute("session.columns", size.width.to_string());
        emulator.set_attribute("session.rows", size.height.to_string());
        emulator.set_attribute("proc.pid", pty.pid().to_string());
        emulator.reset_event_state();

        Ok(Arc::new(TermInstance {
            id,
            owner,
            state: Mutex::new(emulator),
            state_writer: AtomicBool::new(false),
            watchers: Mutex::new(Vec::new()),
            pty: Mutex::new(pty),
            cmd_tx,
            cmd_rx,
            wake: WakePipe::new()?,
            started: Instant::now(),
            stopping: AtomicBool::new(false),
            exited: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    /// Acquire the state lock. Writer acquisitions set the audit marker;
    /// readers must never observe it set while acquiring.
    pub fn lock_state(&self, writeable: bool) -> StateLock<'_> {
        let emulator = self.state.lock();
        if writeable {
            self.state_writer.store(true, Ordering::Release);
        } else {
            debug_assert!(
                !self.state_writer.load(Ordering::Acquire),
                "reader acquired state lock marked writeable"
            );
        }
        StateLock {
            emulator,
            writer: writeable,
            owner: self,
        }
    }

    /// Deciseconds since the terminal started; the row modification stamp.
    fn modtime(&self) -> i32 {
        (self.started.elapsed().as_millis() / 100) as i32
    }

    pub fn send_command(&self, cmd: TermCommand) {
        if self.cmd_tx.send(cmd).is_ok() {
            self.wake.wake();
        }
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        let _ = self.cmd_tx.send(TermCommand::Stop);
        self.wake.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn exit_record(&self) -> Option<ExitRecord> {
        *self.exited.lock()
    }

    /// Called by the monitor once the child is reaped.
    pub fn mark_exited(&self, status: i32) {
        let mut exited = self.exited.lock();
        if exited.is_some() {
            return;
        }
        *exited = Some(ExitRecord {
            status,
            at: Some(Instant::now()),
        });
        drop(exited);

        let (outcome, outcome_str, rc) = decode_wait_status(status);
        self.send_command(TermCommand::SetAttribute {
            key: "proc.outcome".into(),
            value: outcome.to_string(),
        });
        self.send_command(TermCommand::SetAttribute {
            key: "proc.outcomestr".into(),
            value: outcome_str.into(),
        });
        self.send_command(TermCommand::SetAttribute {
            key: "proc.rc".into(),
            value: rc.to_string(),
        });
        info!(term = %self.id.short(), outcome = outcome_str, rc, "child exited");
    }

    pub fn try_reap(&self) -> Option<i32> {
        if self.exited.lock().is_some() {
            return None;
        }
        self.pty.lock().try_wait()
    }

    /// Restart the child in place (exit action `restart`).
    pub fn restart_child(
        &self,
        command: &[String],
        environment: &[String],
    ) -> std::io::Result<()> {
        let size = {
            let lock = self.lock_state(false);
            lock.emulator.size()
        };
        let fresh = PtyProcess::spawn(command, environment, None, size)?;
        let pid = fresh.pid();
        *self.pty.lock() = fresh;
        *self.exited.lock() = None;

        self.send_command(TermCommand::SetAttribute {
            key: "proc.pid".into(),
            value: pid.to_string(),
        });
        self.send_command(TermCommand::RemoveAttribute("proc.outcome".into()));
        self.send_command(TermCommand::RemoveAttribute("proc.rc".into()));
        self.wake.wake();
        Ok(())
    }

    /*
     * Watchers
     */

    pub fn attach_watcher(&self, watcher: Arc<Watcher>) {
        self.watchers.lock().push(watcher);
        // Deliver the initial snapshot
        self.send_command(TermCommand::Drain);
    }

    pub fn detach_conn(&self, conn: Id) {
        self.watchers.lock().retain(|w| w.conn != conn);
    }

    pub fn watchers(&self) -> Vec<Arc<Watcher>> {
        self.watchers.lock().clone()
    }

    /// Notify every watcher the terminal is going away and drop them.
    pub fn close_watchers(&self, reason: u32) {
        let frame = emission::encode_closing(&self.id, core_wire::Command::RemoveTerm, reason);
        for watcher in self.watchers.lock().drain(..) {
            watcher.writer.enqueue_frame(&frame);
        }
        self.closed.store(true, Ordering::Release);
    }

    /*
     * The pty thread
     */

    pub fn run(self: &Arc<Self>) {
        let mut buf = vec![0u8; TERM_BUFSIZE];

        loop {
            if self.stopping.load(Ordering::Acquire) {
                self.drain_for_stop();
                break;
            }

            let master = self.pty.lock().master_fd();
            let fds = [master, self.wake.read_fd()];
            let ready = match poll_readable(&fds, 500) {
                Ok(mask) => mask,
                Err(err) => {
                    warn!(term = %self.id.short(), %err, "pty poll failed");
                    break;
                }
            };

            if ready & 0b10 != 0 {
                self.wake.drain();
                let mut cmds = Vec::new();
                while let Ok(cmd) = self.cmd_rx.try_recv() {
                    cmds.push(cmd);
                }
                if !cmds.is_empty() {
                    self.apply_commands(cmds);
                }
                if self.stopping.load(Ordering::Acquire) {
                    self.drain_for_stop();
                    break;
                }
            }

            if ready & 0b01 != 0 {
                let got = {
                    let pty = self.pty.lock();
                    pty.read(&mut buf)
                };
                match got {
                    Ok(0) => {
                        // Child side closed; the monitor drives lifecycle
                        debug!(term = %self.id.short(), "pty eof");
                        std::thread::sleep(std::time::Duration::from_millis(50));
                    }
                    Ok(n) => self.input_burst(&buf[..n]),
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(err) if err.raw_os_error() == Some(libc::EAGAIN) => {}
                    Err(err) => {
                        // EIO is the normal pty tear-down signal
                        debug!(term = %self.id.short(), %err, "pty read error");
                        std::thread::sleep(std::time::Duration::from_millis(50));
                    }
                }
            }
        }
    }

    /// One input burst: run the emulator, reply to the application, walk the
    /// watchers.
    fn input_burst(&self, bytes: &[u8]) {
        let modtime = self.modtime();
        let replies;
        let commands;
        let data;

        {
            let mut lock = self.lock_state(true);
            let emulator = &mut *lock.emulator;
            emulator.reset_event_state();
            let changed = emulator.term_event(bytes, modtime);
            emulator.release_evicted_content();
            replies = emulator.take_replies();
            commands = emulator.take_term_commands();
            data = emulator.take_term_data();

            if changed {
                self.emit_locked(emulator, false);
            }
        }

        if !replies.is_empty() {
            let _ = self.pty.lock().write_all(&replies);
        }
        for command in commands {
            debug!(term = %self.id.short(), command, "terminal command received");
        }
        for payload in data {
            debug!(term = %self.id.short(), bytes = payload.len(), "inbound terminal data");
        }
    }

    fn apply_commands(&self, cmds: Vec<TermCommand>) {
        let mut input = Vec::new();
        let mut drain = false;
        let mut changed = false;

        {
            let mut lock = self.lock_state(true);
            let emulator = &mut *lock.emulator;
            emulator.reset_event_state();

            for cmd in cmds {
                match cmd {
                    TermCommand::Input(bytes) => input.extend_from_slice(&bytes),
                    TermCommand::Resize(size) => {
                        if let Some(applied) = emulator.term_resize(size) {
                            let _ = self.pty.lock().resize(applied);
                            changed = true;
                        }
                    }
                    TermCommand::BufferResize { bufid, caporder } => {
                        changed |= emulator.buffer_resize(bufid, caporder);
                    }
                    TermCommand::Reset(flags) => {
                        changed |= emulator.term_reset(b"", flags, self.modtime());
                    }
                    TermCommand::MouseMove(pos) => {
                        if emulator.move_mouse(pos) {
                            self.emit_mouse(emulator);
                        }
                    }
                    TermCommand::MouseEvent { event, x, y } => {
                        if emulator.move_mouse(Point::new(x as i32, y as i32)) {
                            self.emit_mouse(emulator);
                        }
                        emulator.term_mouse(event, x, y);
                    }
                    TermCommand::SetAttribute { key, value } => {
                        emulator.set_attribute(&key, value);
                        changed = true;
                    }
                    TermCommand::RemoveAttribute(key) => {
                        emulator.remove_attribute(&key);
                        changed = true;
                    }
                    TermCommand::CreateUserRegion { bufid, region } => {
                        let id = emulator
                            .buffer_mut(bufid as usize % 2)
                            .add_user_region(*region);
                        changed |= id != core_cells::INVALID_REGION_ID;
                    }
                    TermCommand::RemoveUserRegion { bufid, region } => {
                        changed |= emulator.buffer_mut(bufid as usize % 2).remove_user_region(region);
                    }
                    TermCommand::Drain => drain = true,
                    TermCommand::Stop => {
                        self.stopping.store(true, Ordering::Release);
                    }
                }
            }

            if changed || drain {
                self.emit_locked(emulator, drain);
            }

            // Mouse reports and reset form feeds head back into the pty
            input.extend_from_slice(&emulator.take_replies());
        }

        if !input.is_empty() {
            let _ = self.pty.lock().write_all(&input);
        }
    }

    fn drain_for_stop(&self) {
        let mut kept = Vec::new();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            if cmd.must_run() && !matches!(cmd, TermCommand::Stop) {
                kept.push(cmd);
            }
        }
        if !kept.is_empty() {
            self.apply_commands(kept);
        }
    }

    /// Walk the watchers under the state lock, merging this burst's event
    /// state and emitting to everyone who is not throttled.
    fn emit_locked(&self, emulator: &mut XtermEmulator, drain: bool) {
        let watchers = self.watchers.lock().clone();
        if watchers.is_empty() {
            return;
        }

        for watcher in watchers {
            if watcher.writer.is_closed() {
                continue;
            }

            let mut state = watcher.state.lock();
            state.merge_events(emulator.events());
            for bufid in 0..2usize {
                let buffer = emulator.buffer(bufid);
                state.merge_rows(
                    bufid,
                    &buffer.events().changed_rows,
                    buffer.size(),
                    buffer.screen_height(),
                );
                state.merge_regions(&buffer.events().changed_regions);
            }

            if state.needs_snapshot {
                // Fresh watch: pull the visible window of both buffers
                for bufid in 0..2usize {
                    let buffer = emulator.buffer(bufid);
                    let end = buffer.size();
                    let start = end - buffer.screen_height() as u64;
                    for i in start..end {
                        state.changed_rows[bufid].insert(i);
                    }
                    let mut pulled = std::collections::BTreeSet::new();
                    buffer.pull_regions(start, end, &mut pulled);
                    state.merge_regions(&pulled);
                }
                state.needs_snapshot = false;
            }

            let throttled = watcher.writer.queued() > THROTTLE_THRESHOLD;
            if throttled && !drain {
                watcher.set_throttled(true);
                // Scalars still go out latest-value-only
                let mut scalars = WatchState {
                    flags_changed: std::mem::take(&mut state.flags_changed),
                    buffer_changed: std::mem::take(&mut state.buffer_changed),
                    buffer_switched: std::mem::take(&mut state.buffer_switched),
                    size_changed: std::mem::take(&mut state.size_changed),
                    cursor_changed: std::mem::take(&mut state.cursor_changed),
                    bell_count: std::mem::take(&mut state.bell_count),
                    ..Default::default()
                };
                drop(state);
                for frame in emission::encode_term_updates(&self.id, emulator, &mut scalars) {
                    watcher.writer.enqueue_frame(&frame);
                }
                continue;
            }

            watcher.set_throttled(false);
            let frames = emission::encode_term_updates(&self.id, emulator, &mut state);
            drop(state);
            for frame in frames {
                watcher.writer.enqueue_frame(&frame);
            }
        }
    }

    fn emit_mouse(&self, emulator: &XtermEmulator) {
        let pos = emulator.screen().mouse_pos();
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(self.id.as_bytes());
        payload.extend_from_slice(&(pos.x as u32).to_le_bytes());
        payload.extend_from_slice(&(pos.y as u32).to_le_bytes());
        let frame = core_wire::encode_frame(core_wire::Command::MouseMoved as u32, &payload);

        for watcher in self.watchers.lock().iter() {
            watcher.writer.enqueue_frame(&frame);
        }
    }

    /// Timer-driven drain of throttled watchers.
    pub fn drain_throttled(&self) {
        let any = self
            .watchers
            .lock()
            .iter()
            .any(|w| w.is_throttled() && w.writer.queued() <= THROTTLE_THRESHOLD);
        if any {
            self.send_command(TermCommand::Drain);
        }
    }

    pub fn kill_child(&self) {
        self.pty.lock().kill();
    }

    pub fn write_input(&self, bytes: Vec<u8>) {
        self.send_command(TermCommand::Input(bytes));
    }
}

fn decode_wait_status(status: i32) -> (u32, &'static str, i32) {
    if libc::WIFEXITED(status) {
        (1, "exited", libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        (2, "killed", 128 + libc::WTERMSIG(status))
    } else {
        (3, "unknown", -1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::{WatchTarget, Watcher};
    use crate::writer::Writer;

    fn spawn_term() -> Arc<TermInstance> {
        TermInstance::new(
            Id::generate(),
            Id::generate(),
            Size::new(80, 24),
            &EmulatorOptions::default(),
            &["/bin/cat".to_owned()],
            &[],
            None,
        )
        .expect("spawn cat on a pty")
    }

    #[test]
    fn commands_apply_and_emit_to_watchers() {
        let term = spawn_term();
        let writer = Arc::new(Writer::new());
        writer.set_framing(Box::new(core_wire::RawFraming::new()));
        let watcher = Watcher::new(Id::generate(), WatchTarget::Term(term.id), writer.clone());
        term.attach_watcher(watcher);

        let runner = {
            let term = term.clone();
            std::thread::spawn(move || term.run())
        };

        term.send_command(TermCommand::SetAttribute {
            key: "session.title".into(),
            value: "hello".into(),
        });

        // The initial snapshot plus the attribute change must show up
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        while writer.queued() == 0 && Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(writer.queued() > 0, "no emission reached the watcher");

        {
            let lock = term.lock_state(false);
            assert_eq!(lock.emulator.attribute("session.title"), Some("hello"));
        }

        term.stop();
        runner.join().unwrap();
        term.kill_child();
    }

    #[test]
    fn input_flows_through_pty_and_back() {
        let term = spawn_term();
        let runner = {
            let term = term.clone();
            std::thread::spawn(move || term.run())
        };

        // cat echoes what we write
        term.write_input(b"roundtrip\n".to_vec());

        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let mut seen = false;
        while Instant::now() < deadline {
            {
                let lock = term.lock_state(false);
                let row = lock.emulator.buffer(0).const_row(0);
                if row.as_str().contains("roundtrip") {
                    seen = true;
                }
            }
            if seen {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(seen, "pty echo never reached the emulator");

        term.stop();
        runner.join().unwrap();
        term.kill_child();
    }

    #[test]
    fn wait_status_decodes() {
        let (outcome, s, rc) = decode_wait_status(0);
        assert_eq!((outcome, s, rc), (1, "exited", 0));
    }
}
