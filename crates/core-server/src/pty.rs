//! The pty collaborator: fork a child onto a pseudo-terminal, resize it,
//! and shuttle bytes.
//!
//! Environment rules follow the profile syntax: `+KEY=VAL` adds or
//! replaces, `-KEY` removes, anything else is ignored.

use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;

use core_buffer::Size;

#[derive(Debug)]
pub struct PtyProcess {
    master: RawFd,
    pid: libc::pid_t,
}

fn winsize(size: Size) -> libc::winsize {
    libc::winsize {
        ws_row: size.height as u16,
        ws_col: size.width as u16,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// Build the child environment from the parent's plus the rules.
pub fn build_environ(rules: &[String]) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = std::env::vars().collect();

    for rule in rules {
        if let Some(add) = rule.strip_prefix('+') {
            if let Some((key, value)) = add.split_once('=') {
                env.retain(|(k, _)| k != key);
                env.push((key.to_owned(), value.to_owned()));
            }
        } else if let Some(key) = rule.strip_prefix('-') {
            env.retain(|(k, _)| k != key);
        }
    }
    env
}

impl PtyProcess {
    /// Fork `command` into a fresh pty.
    pub fn spawn(
        command: &[String],
        env_rules: &[String],
        dir: Option<&str>,
        size: Size,
    ) -> io::Result<PtyProcess> {
        if command.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
        }

        let argv: Vec<CString> = command
            .iter()
            .map(|a| CString::new(a.as_str()).map_err(|_| io::ErrorKind::InvalidInput.into()))
            .collect::<io::Result<_>>()?;
        let envp: Vec<CString> = build_environ(env_rules)
            .into_iter()
            .map(|(k, v)| CString::new(format!("{k}={v}")).unwrap())
            .collect();
        let dir = match dir {
            Some(d) => Some(CString::new(d).map_err(|_| io::ErrorKind::InvalidInput)?),
            None => None,
        };

        let mut master: RawFd = -1;
        let mut ws = winsize(size);

        // SAFETY: forkpty allocates the pty pair and forks; in the child we
        // only call async-signal-safe functions before exec.
        let pid = unsafe {
            libc::forkpty(
                &mut master,
                std::ptr::null_mut(),
                std::ptr::null(),
                &mut ws,
            )
        };

        match pid {
            -1 => Err(io::Error::last_os_error()),
            0 => {
                // Child
                unsafe {
                    if let Some(dir) = &dir {
                        let _ = libc::chdir(dir.as_ptr());
                    }

                    let mut argv_ptrs: Vec<*const libc::c_char> =
                        argv.iter().map(|a| a.as_ptr()).collect();
                    argv_ptrs.push(std::ptr::null());
                    let mut envp_ptrs: Vec<*const libc::c_char> =
                        envp.iter().map(|e| e.as_ptr()).collect();
                    envp_ptrs.push(std::ptr::null());

                    libc::execve(argv[0].as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
                    // Fall back to PATH search
                    libc::execvp(argv[0].as_ptr(), argv_ptrs.as_ptr());
                    libc::_exit(127);
                }
            }
            pid => Ok(PtyProcess { master, pid }),
        }
    }

    pub fn master_fd(&self) -> RawFd {
        self.master
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    pub fn resize(&self, size: Size) -> io::Result<()> {
        let ws = winsize(size);
        // SAFETY: fd is a live pty master
        let rc = unsafe { libc::ioctl(self.master, libc::TIOCSWINSZ, &ws) };
        if rc == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Read pty output; Ok(0) is EOF (child side closed).
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: reading into an owned buffer on a live fd
        let rc = unsafe { libc::read(self.master, buf.as_mut_ptr().cast(), buf.len()) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }

    pub fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            // SAFETY: writing from a live buffer to a live fd
            let rc = unsafe { libc::write(self.master, buf.as_ptr().cast(), buf.len()) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            buf = &buf[rc as usize..];
        }
        Ok(())
    }

    /// Non-blocking exit check; Some(status) once the child is reaped.
    pub fn try_wait(&self) -> Option<i32> {
        let mut status: libc::c_int = 0;
        // SAFETY: pid is our forked child
        let rc = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
        if rc == self.pid { Some(status) } else { None }
    }

    pub fn kill(&self) {
        // SAFETY: signalling our own child
        unsafe {
            libc::kill(self.pid, libc::SIGHUP);
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        // SAFETY: closing the fd we own
        unsafe {
            libc::close(self.master);
        }
    }
}

/// A self-pipe used to wake a poll loop from another thread.
#[derive(Debug)]
pub struct WakePipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakePipe {
    pub fn new() -> io::Result<WakePipe> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: fds is a valid two-element array
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(WakePipe {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn wake(&self) {
        // SAFETY: writing one byte to our own pipe; EAGAIN when already
        // pending is fine
        unsafe {
            let byte = 1u8;
            libc::write(self.write_fd, (&raw const byte).cast(), 1);
        }
    }

    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        // SAFETY: non-blocking read on our own pipe
        while unsafe { libc::read(self.read_fd, buf.as_mut_ptr().cast(), buf.len()) } > 0 {}
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        // SAFETY: closing fds we own
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Poll `fds` for readability. Returns a bitmask of ready indices, or an
/// empty mask on timeout.
pub fn poll_readable(fds: &[RawFd], timeout_ms: i32) -> io::Result<u32> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    // SAFETY: pollfds is a live array of the right length
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }

    let mut mask = 0u32;
    for (i, p) in pollfds.iter().enumerate() {
        if p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
            mask |= 1 << i;
        }
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environ_rules_apply_in_order() {
        let rules = vec![
            "+TERM=xterm-256color".to_owned(),
            "+FOO=bar".to_owned(),
            "-FOO".to_owned(),
            "+BAZ=1".to_owned(),
        ];
        let env = build_environ(&rules);
        assert!(env.iter().any(|(k, v)| k == "TERM" && v == "xterm-256color"));
        assert!(!env.iter().any(|(k, _)| k == "FOO"));
        assert!(env.iter().any(|(k, v)| k == "BAZ" && v == "1"));
    }

    #[test]
    fn wake_pipe_round_trip() {
        let pipe = WakePipe::new().unwrap();
        let mask = poll_readable(&[pipe.read_fd()], 0).unwrap();
        assert_eq!(mask, 0);

        pipe.wake();
        let mask = poll_readable(&[pipe.read_fd()], 100).unwrap();
        assert_eq!(mask & 1, 1);
        pipe.drain();
        let mask = poll_readable(&[pipe.read_fd()], 0).unwrap();
        assert_eq!(mask, 0);
    }
}
