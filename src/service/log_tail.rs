use crate::error::Result;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const DEFAULT_TAIL_LINES: usize = 200;
const CHUNK_SIZE: u64 = 8192;

/// Last `max_lines` lines of a text file, joined with `\n`.
///
/// Reads backwards from the end in fixed chunks until enough newlines have
/// been seen, so memory stays proportional to the requested tail. A missing
/// file yields an empty string. Invalid UTF-8 is replaced.
pub fn tail_text_file(path: &Path, max_lines: usize) -> Result<String> {
    if max_lines == 0 || !path.exists() {
        return Ok(String::new());
    }

    let mut file = File::open(path)?;
    let mut pos = file.seek(SeekFrom::End(0))?;
    let mut data: Vec<u8> = Vec::new();
    let mut newlines = 0usize;

    while pos > 0 && newlines <= max_lines {
        let step = CHUNK_SIZE.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;

        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        newlines += chunk.iter().filter(|b| **b == b'\n').count();
        chunk.extend_from_slice(&data);
        data = chunk;
    }

    let text = String::from_utf8_lossy(&data);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    Ok(lines[start..].join("\n"))
}

/// Async wrapper that runs the read on the blocking pool.
pub async fn tail_log(path: PathBuf, max_lines: usize) -> Result<String> {
    match tokio::task::spawn_blocking(move || tail_text_file(&path, max_lines)).await {
        Ok(result) => result,
        Err(e) => Err(crate::error::Error::Io(std::io::Error::other(e.to_string()))),
    }
}
