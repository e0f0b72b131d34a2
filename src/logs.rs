/// Log tailing: the last N non-empty lines of the worker's log.
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Returned in place of lines when there is nothing to show.
pub const NO_LOGS: &str = "No logs available";

pub const DEFAULT_LINES: usize = 50;
pub const MAX_LINES: usize = 1000;

const BLOCK_SIZE: u64 = 8 * 1024;

/// Longest line returned. Longer lines keep their last `MAX_LINE_BYTES`.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// At most `max_lines` non-empty lines from the end of `path`, oldest first.
///
/// The file is read backwards from its end in fixed-size blocks, so the cost
/// depends on the lines returned and not on the size of the log.
///
/// A missing, unreadable or empty log is an expected condition and yields
/// `["No logs available"]` instead of an error.
pub fn tail(path: &Path, max_lines: usize) -> Vec<String> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "log file not readable");
            return vec![NO_LOGS.to_string()];
        }
    };

    // Newest first. One line is still wanted for zero so an empty log can be
    // told apart from a non-empty one.
    let mut lines = Vec::new();
    if let Err(e) = read_backwards(&mut file, max_lines.max(1), &mut lines) {
        tracing::warn!(path = %path.display(), error = %e, "failed reading log file");
    }

    if lines.is_empty() {
        return vec![NO_LOGS.to_string()];
    }
    lines.truncate(max_lines);
    lines.reverse();
    lines
}

fn read_backwards(
    file: &mut std::fs::File,
    wanted: usize,
    lines: &mut Vec<String>,
) -> std::io::Result<()> {
    let mut pos = file.seek(SeekFrom::End(0))?;
    // Start of the line that straddles the block boundary, not yet complete.
    let mut carry: Vec<u8> = Vec::new();
    let mut block = vec![0u8; BLOCK_SIZE as usize];

    while pos > 0 && lines.len() < wanted {
        let step = pos.min(BLOCK_SIZE);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let chunk = &mut block[..step as usize];
        file.read_exact(chunk)?;

        let mut buf = Vec::with_capacity(chunk.len() + carry.len());
        buf.extend_from_slice(chunk);
        buf.extend_from_slice(&carry);

        if let Some(first) = buf.iter().position(|&b| b == b'\n') {
            for raw in buf[first + 1..].rsplit(|&b| b == b'\n') {
                if lines.len() == wanted {
                    break;
                }
                push_line(lines, raw);
            }
            buf.truncate(first);
        }
        carry = buf;
        if carry.len() > MAX_LINE_BYTES {
            carry.drain(..carry.len() - MAX_LINE_BYTES);
        }
    }

    if pos == 0 && lines.len() < wanted {
        push_line(lines, &carry);
    }
    Ok(())
}

fn push_line(lines: &mut Vec<String>, raw: &[u8]) {
    let raw = &raw[raw.len().saturating_sub(MAX_LINE_BYTES)..];
    // The worker writes whatever its subprocesses print; don't choke on bad UTF-8.
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return;
    }
    lines.push(line.to_string());
}

/// Clamp a requested line count to what the console is willing to return.
pub fn clamp_lines(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_LINES).min(MAX_LINES)
}
