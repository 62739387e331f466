//! The per-connection reader: handshake, inbound framing, and command
//! dispatch.
//!
//! A connection is a pair of cooperating actors; the reader owns the
//! inbound half and is the only thread that parses this client's frames.
//! Replies go out through the connection's writer queue; the reader never
//! writes the socket itself.

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_buffer::{Region, RegionType, Size};
use core_cells::ResetFlags;
use core_wire::attr::{self as attr_rules, decode_pairs};
use core_wire::{
    Command, Frame, Framing, Handshake, Id, PROTOCOL_VERSION, RawFraming, ShakeResult, StatusCode,
    TermFraming, encode_frame,
};
use tracing::{debug, info, warn};

use crate::instance::{TermCommand, TermInstance};
use crate::listener::{Connection, Listener};
use crate::watch::{WatchTarget, Watcher};
use crate::writer::Writer;

/// Read buffer for the connection socket.
const READER_BUFSIZE: usize = 212992;

/// Outcome of one dispatched frame.
enum Flow {
    Continue,
    Disconnect,
}

pub struct Reader {
    listener: Arc<Listener>,
    conn: Arc<Connection>,
    framing: Box<dyn Framing>,
}

/// Accept loop entry: drive one connection to completion. Owns the reader
/// side; the writer thread is spawned here and joined on exit.
pub fn run_connection(listener: Arc<Listener>, stream: UnixStream) {
    let writer = Arc::new(Writer::new());

    let conn = match listener.register_conn(writer.clone()) {
        Ok(conn) => conn,
        Err(err) => {
            warn!(%err, "rejecting connection");
            return;
        }
    };

    let write_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            warn!(%err, "socket clone failed");
            listener.remove_conn(&conn.id);
            return;
        }
    };
    let writer_thread = {
        let writer = writer.clone();
        std::thread::Builder::new()
            .name(format!("writer-{}", conn.id.short()))
            .spawn(move || writer.run(write_stream))
    };

    if let Err(err) = drive_connection(&listener, &conn, stream) {
        debug!(conn = %conn.id.short(), %err, "connection ended");
    }

    listener.remove_conn(&conn.id);
    writer.close();
    if let Ok(handle) = writer_thread {
        let _ = handle.join();
    }
}

fn drive_connection(
    listener: &Arc<Listener>,
    conn: &Arc<Connection>,
    mut stream: UnixStream,
) -> Result<(), std::io::Error> {
    stream.set_read_timeout(Some(Duration::from_millis(1000)))?;

    // The handshake response must be the first thing on the wire
    let nonce = Id::generate().short();
    conn.writer
        .enqueue_raw(Handshake::hello("server", listener.id(), &nonce).into_bytes());

    let mut handshake = Handshake::new();
    let mut buf = vec![0u8; READER_BUFSIZE];
    let started = Instant::now();

    let residual = loop {
        if started.elapsed() > Duration::from_secs(30) || listener.is_shutting_down() {
            return Ok(());
        }
        let got = match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if would_block(&err) => continue,
            Err(err) => return Err(err),
        };

        match handshake.process(&buf[..got]) {
            Ok(ShakeResult::Ongoing) => continue,
            Ok(ShakeResult::Success) => break std::mem::take(&mut handshake.residual),
            Err(err) => {
                debug!(conn = %conn.id.short(), %err, "handshake failed");
                return Ok(());
            }
        }
    };

    let line = handshake.line().cloned().expect("handshake line parsed");

    let framing: Box<dyn Framing> = match line.role.as_str() {
        "reject" => {
            info!(conn = %conn.id.short(), status = line.version, "peer rejected");
            return Ok(());
        }
        _ if line.version != PROTOCOL_VERSION => {
            let reject = Handshake::response(
                "reject",
                StatusCode::ProtocolMismatch as u32,
                listener.id(),
                "",
            );
            conn.writer.enqueue_raw(reject.into_bytes());
            return Ok(());
        }
        "raw" => {
            conn.writer.set_framing(Box::new(RawFraming::new()));
            Box::new(RawFraming::new())
        }
        "term" => {
            conn.writer.set_framing(Box::new(TermFraming::new()));
            Box::new(TermFraming::new())
        }
        "clientfd" | "serverfd" => {
            // Descriptor transfer is the forwarder collaborator's job
            let reject = Handshake::response(
                "reject",
                StatusCode::ProtocolError as u32,
                listener.id(),
                "",
            );
            conn.writer.enqueue_raw(reject.into_bytes());
            return Ok(());
        }
        other => {
            debug!(conn = %conn.id.short(), role = other, "unsupported protocol type");
            let reject = Handshake::response(
                "reject",
                StatusCode::ProtocolMismatch as u32,
                listener.id(),
                "",
            );
            conn.writer.enqueue_raw(reject.into_bytes());
            return Ok(());
        }
    };

    *conn.remote_id.lock() = line.id;
    {
        let mut attrs = conn.attributes.lock();
        attrs.insert("sender.id".into(), line.id.to_string());
    }

    let mut reader = Reader {
        listener: listener.clone(),
        conn: conn.clone(),
        framing,
    };

    // Announce the server and existing terminals before any client command
    listener.attach_conn(conn);

    let keepalive = listener
        .config()
        .keepalive()
        .unwrap_or(Duration::from_millis(core_wire::KEEPALIVE_DEFAULT as u64));
    let mut last_inbound = Instant::now();
    let mut last_keepalive = Instant::now();

    let mut frames = Vec::new();
    if !residual.is_empty() {
        if let Err(err) = reader.framing.feed(&residual, &mut frames) {
            debug!(conn = %conn.id.short(), %err, "protocol error in residual");
            reader.send_disconnect(StatusCode::ProtocolError);
            return Ok(());
        }
    }

    loop {
        for frame in frames.drain(..) {
            match reader.handle_frame(frame) {
                Flow::Continue => {}
                Flow::Disconnect => return Ok(()),
            }
        }

        if listener.is_shutting_down() || conn.writer.is_closed() {
            return Ok(());
        }
        if last_keepalive.elapsed() >= keepalive {
            conn.writer.enqueue_frame(&encode_frame(Command::Keepalive as u32, &[]));
            last_keepalive = Instant::now();
        }
        if last_inbound.elapsed() > keepalive * 2 {
            info!(conn = %conn.id.short(), "keepalive expired");
            reader.send_disconnect(StatusCode::IdleTimeout);
            return Ok(());
        }

        let got = match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if would_block(&err) => continue,
            Err(err) => return Err(err),
        };
        last_inbound = Instant::now();

        if let Err(err) = reader.framing.feed(&buf[..got], &mut frames) {
            debug!(conn = %conn.id.short(), %err, "protocol error");
            reader.send_disconnect(StatusCode::ProtocolError);
            return Ok(());
        }
    }
}

fn would_block(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
    )
}

/// Little-endian field cursor over a frame payload.
struct Fields<'a>(&'a [u8]);

impl<'a> Fields<'a> {
    fn id(&mut self) -> Option<Id> {
        if self.0.len() < 16 {
            return None;
        }
        let (head, rest) = self.0.split_at(16);
        self.0 = rest;
        Some(Id::from_bytes(head.try_into().unwrap()))
    }

    fn u32(&mut self) -> Option<u32> {
        if self.0.len() < 4 {
            return None;
        }
        let (head, rest) = self.0.split_at(4);
        self.0 = rest;
        Some(u32::from_le_bytes(head.try_into().unwrap()))
    }

    fn u64(&mut self) -> Option<u64> {
        if self.0.len() < 8 {
            return None;
        }
        let (head, rest) = self.0.split_at(8);
        self.0 = rest;
        Some(u64::from_le_bytes(head.try_into().unwrap()))
    }

    fn rest(self) -> &'a [u8] {
        self.0
    }
}

impl Reader {
    fn send_disconnect(&self, status: StatusCode) {
        let frame = encode_frame(Command::Disconnect as u32, &(status as u32).to_le_bytes());
        self.conn.writer.enqueue_frame(&frame);
        self.conn.writer.close();
    }

    fn send_error(&self, command: Command, status: StatusCode) {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&(status as u32).to_le_bytes());
        payload.extend_from_slice(&(command as u32).to_le_bytes());
        self.conn
            .writer
            .enqueue_frame(&encode_frame(Command::ErrorResponse as u32, &payload));
    }

    fn term_or_error(&self, id: Option<Id>, command: Command) -> Option<Arc<TermInstance>> {
        let Some(id) = id else {
            self.send_error(command, StatusCode::ProtocolError);
            return None;
        };
        match self.listener.term(&id) {
            Some(term) => Some(term),
            None => {
                self.send_error(command, StatusCode::NotFound);
                None
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Flow {
        let Some(command) = Command::from_u32(frame.command) else {
            debug!(conn = %self.conn.id.short(), command = frame.command, "unknown command");
            self.send_error(Command::ErrorResponse, StatusCode::ProtocolError);
            return Flow::Continue;
        };
        let mut fields = Fields(&frame.payload);

        match command {
            Command::Keepalive | Command::Acknowledge => {}
            Command::ThrottlePause | Command::ThrottleResume => {}
            Command::Disconnect => return Flow::Disconnect,

            Command::CreateTerm => {
                let cols = fields.u32().unwrap_or(80).clamp(16, 1024);
                let rows = fields.u32().unwrap_or(24).clamp(8, 1024);
                let owner = *self.conn.remote_id.lock();
                if let Err(err) =
                    self.listener
                        .create_term(owner, Size::new(cols as i32, rows as i32), None)
                {
                    warn!(%err, "create term failed");
                    self.send_error(command, err.status());
                }
            }

            Command::DestroyTerm => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    self.listener.destroy_term(&term.id, StatusCode::Closed as u32);
                }
            }

            Command::ResizeTerm => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let cols = fields.u32().unwrap_or(80) as i32;
                    let rows = fields.u32().unwrap_or(24) as i32;
                    term.send_command(TermCommand::Resize(Size::new(cols, rows)));
                }
            }

            Command::ResizeBuffer => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let bufid = fields.u32().unwrap_or(0) as u8;
                    let caporder = fields.u32().unwrap_or(0) as u8;
                    term.send_command(TermCommand::BufferResize { bufid, caporder });
                }
            }

            Command::SendInput => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    term.write_input(fields.rest().to_vec());
                }
            }

            Command::ResetTerm => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let flags = ResetFlags::from_bits_truncate(fields.u32().unwrap_or(1));
                    term.send_command(TermCommand::Reset(flags));
                }
            }

            Command::MouseEvent => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let event = fields.u32().unwrap_or(0);
                    let x = fields.u32().unwrap_or(0);
                    let y = fields.u32().unwrap_or(0);
                    term.send_command(TermCommand::MouseEvent { event, x, y });
                }
            }

            Command::AnnounceTerm => {
                // Explicit re-subscription
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    term.detach_conn(self.conn.id);
                    let watcher = Watcher::new(
                        self.conn.id,
                        WatchTarget::Term(term.id),
                        self.conn.writer.clone(),
                    );
                    term.attach_watcher(watcher);
                }
            }

            Command::GetTermAttribute => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let key = String::from_utf8_lossy(fields.rest()).trim_end_matches('\0').to_owned();
                    let lock = term.lock_state(false);
                    let mut payload = Vec::new();
                    payload.extend_from_slice(term.id.as_bytes());
                    payload.extend_from_slice(key.as_bytes());
                    payload.push(0);
                    match lock.emulator.attribute(&key) {
                        Some(value) => {
                            payload.extend_from_slice(value.as_bytes());
                            payload.push(0);
                        }
                        None => {
                            self.send_error(command, StatusCode::NotFound);
                            return Flow::Continue;
                        }
                    }
                    drop(lock);
                    self.conn
                        .writer
                        .enqueue_frame(&encode_frame(command as u32, &payload));
                }
            }

            Command::SetTermAttribute => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let pairs = decode_pairs(fields.rest());
                    for (key, value) in pairs {
                        if attr_rules::is_restricted(&key) {
                            self.send_error(command, StatusCode::ReadOnly);
                            continue;
                        }
                        match value {
                            Some(value) if attr_rules::fits(&key, &value) => {
                                term.send_command(TermCommand::SetAttribute { key, value });
                            }
                            Some(_) => self.send_error(command, StatusCode::LimitExceeded),
                            None => term.send_command(TermCommand::RemoveAttribute(key)),
                        }
                    }
                }
            }

            Command::RemoveTermAttribute => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let key = String::from_utf8_lossy(fields.rest()).trim_end_matches('\0').to_owned();
                    if attr_rules::is_restricted(&key) {
                        self.send_error(command, StatusCode::ReadOnly);
                    } else {
                        term.send_command(TermCommand::RemoveAttribute(key));
                    }
                }
            }

            Command::GetServerAttribute
            | Command::SetServerAttribute
            | Command::RemoveServerAttribute => {
                self.handle_server_attribute(command, fields);
            }

            Command::GetConnAttribute | Command::SetConnAttribute | Command::RemoveConnAttribute => {
                self.handle_conn_attribute(command, fields);
            }

            Command::GetRows => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let bufid = (fields.u32().unwrap_or(0) as usize) % 2;
                    let start = fields.u64().unwrap_or(0);
                    let end = fields.u64().unwrap_or(0);
                    self.reply_rows(&term, bufid, start, end);
                }
            }

            Command::GetRegion => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let bufid = (fields.u32().unwrap_or(0) as usize) % 2;
                    let region = fields.u32().unwrap_or(0);
                    self.reply_region(&term, bufid, region, command);
                }
            }

            Command::GetContent => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let content = fields.u64().unwrap_or(0);
                    let lock = term.lock_state(false);
                    match lock.emulator.content().get(content) {
                        Some(data) => {
                            let mut payload = Vec::with_capacity(24 + data.len());
                            payload.extend_from_slice(term.id.as_bytes());
                            payload.extend_from_slice(&content.to_le_bytes());
                            payload.extend_from_slice(&data);
                            drop(lock);
                            self.conn
                                .writer
                                .enqueue_frame(&encode_frame(command as u32, &payload));
                        }
                        None => {
                            drop(lock);
                            self.send_error(command, StatusCode::NotFound);
                        }
                    }
                }
            }

            Command::CreateRegion => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let bufid = fields.u32().unwrap_or(0) as u8;
                    let Some(start_row) = fields.u64() else {
                        self.send_error(command, StatusCode::ProtocolError);
                        return Flow::Continue;
                    };
                    let end_row = fields.u64().unwrap_or(start_row);
                    let start_col = fields.u32().unwrap_or(0);
                    let end_col = fields.u32().unwrap_or(0);

                    let mut region = Region::new(RegionType::User);
                    region.start_row = start_row;
                    region.end_row = end_row;
                    region.start_col = start_col;
                    region.end_col = end_col;
                    for (key, value) in decode_pairs(fields.rest()) {
                        if let Some(value) = value {
                            region.attributes.insert(key, value);
                        }
                    }
                    term.send_command(TermCommand::CreateUserRegion {
                        bufid,
                        region: Box::new(region),
                    });
                }
            }

            Command::RemoveRegion => {
                if let Some(term) = self.term_or_error(fields.id(), command) {
                    let bufid = fields.u32().unwrap_or(0) as u8;
                    let region = fields.u32().unwrap_or(0);
                    term.send_command(TermCommand::RemoveUserRegion { bufid, region });
                }
            }

            Command::TaskStart | Command::TaskInput | Command::TaskOutput | Command::TaskCancel => {
                // Tasks belong to the file/process collaborators
                self.send_error(command, StatusCode::NotFound);
            }

            // Server-to-client commands have no inbound meaning
            _ => {
                debug!(conn = %self.conn.id.short(), ?command, "ignoring inbound frame");
            }
        }

        Flow::Continue
    }

    fn handle_server_attribute(&mut self, command: Command, mut fields: Fields<'_>) {
        // Target id names the server; tolerate its absence
        let _ = fields.id();
        let body = fields.rest();

        match command {
            Command::GetServerAttribute => {
                let key = String::from_utf8_lossy(body).trim_end_matches('\0').to_owned();
                let attrs = self.listener.attributes();
                match attrs.get(&key) {
                    Some(value) => {
                        let mut payload = Vec::new();
                        payload.extend_from_slice(self.listener.id().as_bytes());
                        payload.extend_from_slice(key.as_bytes());
                        payload.push(0);
                        payload.extend_from_slice(value.as_bytes());
                        payload.push(0);
                        drop(attrs);
                        self.conn
                            .writer
                            .enqueue_frame(&encode_frame(command as u32, &payload));
                    }
                    None => {
                        drop(attrs);
                        self.send_error(command, StatusCode::NotFound);
                    }
                }
            }
            Command::SetServerAttribute => {
                for (key, value) in decode_pairs(body) {
                    let ok = match value {
                        Some(value) => {
                            crate::attr::apply_client_set(&mut self.listener.attributes(), &key, value)
                        }
                        None => crate::attr::apply_client_remove(&mut self.listener.attributes(), &key),
                    };
                    if !ok {
                        self.send_error(command, StatusCode::ReadOnly);
                    }
                }
            }
            _ => {
                let key = String::from_utf8_lossy(body).trim_end_matches('\0').to_owned();
                if !crate::attr::apply_client_remove(&mut self.listener.attributes(), &key) {
                    self.send_error(command, StatusCode::ReadOnly);
                }
            }
        }
    }

    fn handle_conn_attribute(&mut self, command: Command, mut fields: Fields<'_>) {
        let Some(id) = fields.id() else {
            self.send_error(command, StatusCode::ProtocolError);
            return;
        };
        let Some(target) = self.listener.conn(&id) else {
            self.send_error(command, StatusCode::NotFound);
            return;
        };
        let body = fields.rest();

        match command {
            Command::GetConnAttribute => {
                let key = String::from_utf8_lossy(body).trim_end_matches('\0').to_owned();
                let attrs = target.attributes.lock();
                match attrs.get(&key) {
                    Some(value) => {
                        let mut payload = Vec::new();
                        payload.extend_from_slice(id.as_bytes());
                        payload.extend_from_slice(key.as_bytes());
                        payload.push(0);
                        payload.extend_from_slice(value.as_bytes());
                        payload.push(0);
                        drop(attrs);
                        self.conn
                            .writer
                            .enqueue_frame(&encode_frame(command as u32, &payload));
                    }
                    None => {
                        drop(attrs);
                        self.send_error(command, StatusCode::NotFound);
                    }
                }
            }
            Command::SetConnAttribute => {
                for (key, value) in decode_pairs(body) {
                    let ok = match value {
                        Some(value) => {
                            crate::attr::apply_client_set(&mut target.attributes.lock(), &key, value)
                        }
                        None => crate::attr::apply_client_remove(&mut target.attributes.lock(), &key),
                    };
                    if !ok {
                        self.send_error(command, StatusCode::ReadOnly);
                    }
                }
            }
            _ => {
                let key = String::from_utf8_lossy(body).trim_end_matches('\0').to_owned();
                if !crate::attr::apply_client_remove(&mut target.attributes.lock(), &key) {
                    self.send_error(command, StatusCode::ReadOnly);
                }
            }
        }
    }

    fn reply_rows(&self, term: &Arc<TermInstance>, bufid: usize, start: u64, end: u64) {
        let lock = term.lock_state(false);
        let buffer = lock.emulator.buffer(bufid);
        let size = buffer.size();
        let mut frames = Vec::new();

        // Rows only; no envelope bookkeeping for a direct fetch
        for i in start..end.min(size) {
            let row = buffer.const_row(i);
            let mut payload = Vec::new();
            payload.extend_from_slice(term.id.as_bytes());
            payload.extend_from_slice(&i.to_le_bytes());
            payload.extend_from_slice(&(row.flags.bits() | bufid as u32).to_le_bytes());
            payload.extend_from_slice(&(row.modtime as u32).to_le_bytes());
            payload.extend_from_slice(&row.num_ranges().to_le_bytes());
            for r in row.ranges() {
                for word in [r.start, r.end, r.flags.bits(), r.fg, r.bg, r.link] {
                    payload.extend_from_slice(&word.to_le_bytes());
                }
            }
            payload.extend_from_slice(row.as_str().as_bytes());
            frames.push(encode_frame(Command::RowContent as u32, &payload));
        }
        drop(lock);

        for frame in frames {
            self.conn.writer.enqueue_frame(&frame);
        }
    }

    fn reply_region(&self, term: &Arc<TermInstance>, bufid: usize, region: u32, command: Command) {
        let lock = term.lock_state(false);
        let Some(region) = lock.emulator.buffer(bufid).region(region) else {
            drop(lock);
            self.send_error(command, StatusCode::NotFound);
            return;
        };

        let mut payload = Vec::new();
        payload.extend_from_slice(term.id.as_bytes());
        payload.extend_from_slice(&region.id.to_le_bytes());
        payload.extend_from_slice(&region.wire_type().to_le_bytes());
        payload.extend_from_slice(&region.flags.bits().to_le_bytes());
        payload.extend_from_slice(&region.parent.to_le_bytes());
        payload.extend_from_slice(&region.start_row.to_le_bytes());
        payload.extend_from_slice(&region.end_row.to_le_bytes());
        payload.extend_from_slice(&region.start_col.to_le_bytes());
        payload.extend_from_slice(&region.end_col.to_le_bytes());
        for (key, value) in &region.attributes {
            payload.extend_from_slice(key.as_bytes());
            payload.push(0);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        drop(lock);

        self.conn
            .writer
            .enqueue_frame(&encode_frame(Command::RegionUpdate as u32, &payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_config::Config;
    use std::io::Write;

    fn test_listener() -> Arc<Listener> {
        let mut config = Config::default().clamped();
        config.emulator.command = vec!["/bin/cat".into()];
        config.server.keepalive_ms = 5_000;
        Listener::new(config)
    }

    fn read_until_frames(
        stream: &mut UnixStream,
        machine: &mut RawFraming,
        out: &mut Vec<Frame>,
        want: usize,
    ) {
        let mut buf = [0u8; 65536];
        let deadline = Instant::now() + Duration::from_secs(5);
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        while out.len() < want && Instant::now() < deadline {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => machine.feed(&buf[..n], out).unwrap(),
                Err(ref e) if would_block(e) => continue,
                Err(_) => break,
            }
        }
    }

    #[test]
    fn full_client_session_over_socketpair() {
        let listener = test_listener();
        let (server_side, mut client) = UnixStream::pair().unwrap();

        let reader_thread = {
            let listener = listener.clone();
            std::thread::spawn(move || run_connection(listener, server_side))
        };

        // Server speaks first; find its hello
        let mut shake = Handshake::new();
        let mut buf = [0u8; 4096];
        client
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            assert!(Instant::now() < deadline, "no hello from server");
            match client.read(&mut buf) {
                Ok(0) => panic!("server closed during handshake"),
                Ok(n) => {
                    if shake.process(&buf[..n]).unwrap() == ShakeResult::Success {
                        break;
                    }
                }
                Err(ref e) if would_block(e) => continue,
                Err(e) => panic!("read error: {e}"),
            }
        }
        let hello = shake.line().unwrap().clone();
        assert_eq!(hello.role, "server");
        assert_eq!(hello.id, listener.id());

        // Choose the raw protocol
        let client_id = Id::generate();
        client
            .write_all(Handshake::response("raw", PROTOCOL_VERSION, client_id, "n").as_bytes())
            .unwrap();

        // Expect the server announce
        let mut machine = RawFraming::new();
        let mut frames = Vec::new();
        read_until_frames(&mut client, &mut machine, &mut frames, 1);
        assert!(
            frames
                .iter()
                .any(|f| f.command == Command::AnnounceServer as u32)
        );

        // Create a terminal and expect an announce plus a snapshot
        let mut create = Vec::new();
        create.extend_from_slice(&80u32.to_le_bytes());
        create.extend_from_slice(&24u32.to_le_bytes());
        client
            .write_all(&encode_frame(Command::CreateTerm as u32, &create))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline
            && !frames
                .iter()
                .any(|f| f.command == Command::AnnounceTerm as u32)
        {
            let target = frames.len() + 1;
            read_until_frames(&mut client, &mut machine, &mut frames, target);
        }
        let announce = frames
            .iter()
            .find(|f| f.command == Command::AnnounceTerm as u32)
            .expect("terminal announced");
        let term_id = Id::from_bytes(announce.payload[..16].try_into().unwrap());
        assert!(listener.term(&term_id).is_some());

        // The initial snapshot must arrive enveloped
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline
            && !frames
                .iter()
                .any(|f| f.command == Command::BeginOutput as u32)
        {
            let target = frames.len() + 1;
            read_until_frames(&mut client, &mut machine, &mut frames, target);
        }
        assert!(
            frames
                .iter()
                .any(|f| f.command == Command::SizeChanged as u32)
        );

        // Send input; cat echoes; expect a row-content update
        let mut input = Vec::new();
        input.extend_from_slice(term_id.as_bytes());
        input.extend_from_slice(b"echo-me");
        client
            .write_all(&encode_frame(Command::SendInput as u32, &input))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut saw_row = false;
        while Instant::now() < deadline && !saw_row {
            let target = frames.len() + 1;
            read_until_frames(&mut client, &mut machine, &mut frames, target);
            saw_row = frames.iter().any(|f| {
                f.command == Command::RowContent as u32
                    && f.payload.len() > 36
                    && String::from_utf8_lossy(&f.payload[36..]).contains("echo-me")
            });
        }
        assert!(saw_row, "echoed row never arrived");

        // Clean disconnect
        client
            .write_all(&encode_frame(Command::Disconnect as u32, &[]))
            .unwrap();
        reader_thread.join().unwrap();

        listener.destroy_term(&term_id, 0);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let listener = test_listener();
        let (server_side, mut client) = UnixStream::pair().unwrap();

        let reader_thread = {
            let listener = listener.clone();
            std::thread::spawn(move || run_connection(listener, server_side))
        };

        client
            .write_all(Handshake::response("raw", 999, Id::generate(), "n").as_bytes())
            .unwrap();

        // Expect a reject line back
        let mut shake = Handshake::new();
        let mut buf = [0u8; 4096];
        client
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut lines = Vec::new();
        while Instant::now() < deadline && lines.len() < 2 {
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let mut rest: &[u8] = &buf[..n];
                    while !rest.is_empty() {
                        match shake.process(rest) {
                            Ok(ShakeResult::Success) => {
                                lines.push(shake.line().unwrap().clone());
                                let residual = std::mem::take(&mut shake.residual);
                                shake.reset();
                                let keep = residual;
                                rest = &[];
                                if !keep.is_empty() {
                                    if shake.process(&keep).unwrap() == ShakeResult::Success {
                                        lines.push(shake.line().unwrap().clone());
                                        shake.reset();
                                    }
                                }
                            }
                            Ok(ShakeResult::Ongoing) => rest = &[],
                            Err(_) => {
                                rest = &[];
                            }
                        }
                    }
                }
                Err(ref e) if would_block(e) => continue,
                Err(_) => break,
            }
        }

        let reject = lines.iter().find(|l| l.role == "reject");
        assert!(reject.is_some(), "no reject line seen: {lines:?}");
        assert_eq!(
            reject.unwrap().version,
            StatusCode::ProtocolMismatch as u32
        );

        reader_thread.join().unwrap();
    }
}
