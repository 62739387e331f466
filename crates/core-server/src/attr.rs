//! Attribute stores and the attribute-script collaborator.
//!
//! Scripts are external programs whose stdout yields `KEY=VALUE` lines
//! (optionally NUL-separated). They run with a hard timeout; restricted
//! keys in their output are silently dropped, and a failing script only
//! costs its own contribution.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use core_wire::attr::{AttributeMap, fits, is_restricted};
use tracing::warn;

/// Timeout for attribute scripts.
pub const SCRIPT_TIMEOUT: Duration = Duration::from_millis(4000);

/// Apply one mutation under the server's rules. Returns false when the key
/// is restricted or the line is oversize.
pub fn apply_client_set(map: &mut AttributeMap, key: &str, value: String) -> bool {
    if is_restricted(key) || !fits(key, &value) {
        return false;
    }
    map.insert(key.to_owned(), value);
    true
}

pub fn apply_client_remove(map: &mut AttributeMap, key: &str) -> bool {
    if is_restricted(key) {
        return false;
    }
    map.remove(key).is_some()
}

/// Parse `KEY=VALUE` entries split on newlines or NULs.
pub fn parse_script_output(output: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(output);
    let mut out = Vec::new();

    for line in text.split(['\n', '\0']) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.is_empty() {
                continue;
            }
            out.push((key.to_owned(), value.to_owned()));
        }
    }
    out
}

/// Run one attribute script and merge its output. Restricted keys and
/// oversize lines are dropped; failures are logged and ignored.
pub fn run_attribute_script(map: &mut AttributeMap, script: &str) {
    let started = Instant::now();

    let mut child = match Command::new(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            warn!(script, %err, "attribute script failed to start");
            return;
        }
    };

    // Poll for exit within the timeout; scripts are expected to be quick
    let finished = loop {
        match child.try_wait() {
            Ok(Some(_)) => break true,
            Ok(None) => {
                if started.elapsed() >= SCRIPT_TIMEOUT {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(script, "attribute script timed out");
                    break false;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                warn!(script, %err, "attribute script wait failed");
                break false;
            }
        }
    };

    if !finished {
        return;
    }

    let mut output = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        let _ = stdout.read_to_end(&mut output);
    }

    for (key, value) in parse_script_output(&output) {
        if is_restricted(&key) || !fits(&key, &value) {
            continue;
        }
        map.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_keys_are_refused() {
        let mut map = AttributeMap::new();
        assert!(!apply_client_set(&mut map, "id", "spoof".into()));
        assert!(!apply_client_set(&mut map, "proc.rc", "0".into()));
        assert!(apply_client_set(&mut map, "session.title", "ok".into()));
        assert!(map.contains_key("session.title"));
    }

    #[test]
    fn oversize_lines_are_refused() {
        let mut map = AttributeMap::new();
        let big = "v".repeat(5000);
        assert!(!apply_client_set(&mut map, "user.big", big));
    }

    #[test]
    fn script_output_parses_both_separators() {
        let parsed = parse_script_output(b"a=1\nb=2\0c=3\n\n=skipped\nplain\n");
        assert_eq!(
            parsed,
            vec![
                ("a".to_owned(), "1".to_owned()),
                ("b".to_owned(), "2".to_owned()),
                ("c".to_owned(), "3".to_owned()),
            ]
        );
    }

    #[test]
    fn script_merges_unrestricted_keys() {
        let mut map = AttributeMap::new();
        run_attribute_script(&mut map, "/bin/sh");
        // A shell with no input exits quickly and outputs nothing
        assert!(map.is_empty());
    }
}
