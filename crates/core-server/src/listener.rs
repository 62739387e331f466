//! The listener: the global registry of terminals and connections, the
//! server's identity, and command distribution by UUID.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use core_buffer::Size;
use core_config::Config;
use core_emu::EmulatorOptions;
use core_wire::attr::AttributeMap;
use core_wire::{Command, Id};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::attr::run_attribute_script;
use crate::emission;
use crate::error::ServerError;
use crate::instance::TermInstance;
use crate::watch::{WatchTarget, Watcher};
use crate::writer::Writer;

/// One registered client connection.
pub struct Connection {
    pub id: Id,
    pub remote_id: Mutex<Id>,
    pub attributes: Mutex<AttributeMap>,
    pub writer: Arc<Writer>,
}

pub struct Listener {
    id: Id,
    config: Config,
    attributes: Mutex<AttributeMap>,
    terms: Mutex<HashMap<Id, Arc<TermInstance>>>,
    conns: Mutex<HashMap<Id, Arc<Connection>>>,
    shutdown: AtomicBool,
}

impl Listener {
    pub fn new(config: Config) -> Arc<Listener> {
        let id = Id::generate();
        let mut attributes = AttributeMap::new();
        attributes.insert("id".into(), id.to_string());
        if let Ok(host) = std::env::var("HOSTNAME") {
            attributes.insert("host".into(), host);
        }
        if let Ok(user) = std::env::var("USER") {
            attributes.insert("user".into(), user);
        }
        attributes.insert(
            "started".into(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs().to_string())
                .unwrap_or_default(),
        );

        for script in &config.server.attribute_scripts {
            run_attribute_script(&mut attributes, script);
        }

        info!(server = %id.short(), "listener created");
        Arc::new(Listener {
            id,
            config,
            attributes: Mutex::new(attributes),
            terms: Mutex::new(HashMap::new()),
            conns: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn attributes(&self) -> parking_lot::MutexGuard<'_, AttributeMap> {
        self.attributes.lock()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /*
     * Terminals
     */

    /// Create a terminal, spawn its pty thread, and announce it to every
    /// connection.
    pub fn create_term(
        self: &Arc<Self>,
        owner: Id,
        size: Size,
        command: Option<Vec<String>>,
    ) -> Result<Arc<TermInstance>, ServerError> {
        let options = EmulatorOptions {
            caporder: self.config.emulator.caporder,
            prompt_newline: self.config.emulator.prompt_newline,
            scroll_clear: self.config.emulator.scroll_clear,
            answerback: self.config.emulator.answerback.clone(),
            content_limit: self.config.emulator.content_limit,
            ..Default::default()
        };
        let command = command.unwrap_or_else(|| self.config.emulator.command.clone());

        let id = Id::generate();
        let term = TermInstance::new(
            id,
            owner,
            size,
            &options,
            &command,
            &self.config.emulator.environment,
            None,
        )?;

        self.terms.lock().insert(id, term.clone());

        {
            let runner = term.clone();
            std::thread::Builder::new()
                .name(format!("term-{}", id.short()))
                .spawn(move || runner.run())?;
        }

        // Announce to every connection and subscribe it
        for conn in self.conns.lock().values() {
            self.announce_term_to(&term, conn);
        }

        info!(term = %id.short(), owner = %owner.short(), "terminal created");
        Ok(term)
    }

    pub fn term(&self, id: &Id) -> Option<Arc<TermInstance>> {
        self.terms.lock().get(id).cloned()
    }

    pub fn terms(&self) -> Vec<Arc<TermInstance>> {
        self.terms.lock().values().cloned().collect()
    }

    /// Tear a terminal down: watchers get REMOVE_TERM, the child gets
    /// SIGHUP, the pty thread stops.
    pub fn destroy_term(&self, id: &Id, reason: u32) {
        let Some(term) = self.terms.lock().remove(id) else {
            return;
        };
        term.close_watchers(reason);
        term.stop();
        term.kill_child();
        info!(term = %id.short(), reason, "terminal destroyed");
    }

    fn announce_term_to(&self, term: &Arc<TermInstance>, conn: &Arc<Connection>) {
        let (cols, rows) = {
            let lock = term.lock_state(false);
            let size = lock.emulator.size();
            (size.width as u32, size.height as u32)
        };

        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(term.id.as_bytes());
        payload.extend_from_slice(&cols.to_le_bytes());
        payload.extend_from_slice(&rows.to_le_bytes());
        conn.writer
            .enqueue_frame(&core_wire::encode_frame(Command::AnnounceTerm as u32, &payload));

        let watcher = Watcher::new(conn.id, WatchTarget::Term(term.id), conn.writer.clone());
        term.attach_watcher(watcher);
    }

    /*
     * Connections
     */

    pub fn register_conn(self: &Arc<Self>, writer: Arc<Writer>) -> Result<Arc<Connection>, ServerError> {
        let mut conns = self.conns.lock();
        if conns.len() >= self.config.server.max_connections {
            return Err(ServerError::LimitExceeded);
        }

        let id = Id::generate();
        let mut attributes = AttributeMap::new();
        attributes.insert("id".into(), id.to_string());
        attributes.insert(
            "started".into(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs().to_string())
                .unwrap_or_default(),
        );

        let conn = Arc::new(Connection {
            id,
            remote_id: Mutex::new(Id::NIL),
            attributes: Mutex::new(attributes),
            writer,
        });
        conns.insert(id, conn.clone());
        drop(conns);

        info!(conn = %id.short(), "connection registered");
        Ok(conn)
    }

    /// Called once the handshake finishes: announce the server and every
    /// terminal, subscribing the connection to each.
    pub fn attach_conn(self: &Arc<Self>, conn: &Arc<Connection>) {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(self.id.as_bytes());
        conn.writer
            .enqueue_frame(&core_wire::encode_frame(Command::AnnounceServer as u32, &payload));

        for frame in emission::encode_attribute_updates(
            &self.id,
            Command::GetServerAttribute,
            &self.attributes.lock(),
        ) {
            conn.writer.enqueue_frame(&frame);
        }

        for term in self.terms() {
            self.announce_term_to(&term, conn);
        }
    }

    pub fn conn(&self, id: &Id) -> Option<Arc<Connection>> {
        self.conns.lock().get(id).cloned()
    }

    /// Drop a connection and every watcher it held.
    pub fn remove_conn(&self, id: &Id) {
        let Some(conn) = self.conns.lock().remove(id) else {
            return;
        };
        conn.writer.close();
        for term in self.terms() {
            term.detach_conn(*id);
        }
        info!(conn = %id.short(), "connection removed");
    }

    /// Full shutdown: every connection disconnected, every terminal closed.
    pub fn shutdown_all(&self) {
        self.request_shutdown();

        let conn_ids: Vec<Id> = self.conns.lock().keys().copied().collect();
        for id in conn_ids {
            if let Some(conn) = self.conn(&id) {
                let frame = core_wire::encode_frame(
                    Command::Disconnect as u32,
                    &(core_wire::StatusCode::ServerShutdown as u32).to_le_bytes(),
                );
                conn.writer.enqueue_frame(&frame);
            }
            self.remove_conn(&id);
        }

        let term_ids: Vec<Id> = self.terms.lock().keys().copied().collect();
        for id in term_ids {
            self.destroy_term(&id, core_wire::StatusCode::ServerShutdown as u32);
        }

        warn!("listener shut down");
    }
}
