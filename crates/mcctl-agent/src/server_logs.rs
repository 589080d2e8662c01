use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

pub const DEFAULT_TAIL_LINES: usize = 100;
const LOG_FILE_NAMES: [&str; 2] = ["server.log", "latest.log"];

/// Most recently modified server log anywhere under `root`.
pub fn find_log_file(root: &Path) -> Option<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let is_log = entry
            .file_name()
            .to_str()
            .is_some_and(|name| LOG_FILE_NAMES.contains(&name));
        if !is_log {
            continue;
        }
        let modified = entry
            .metadata()
            .ok()
            .and_then(|meta| meta.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let newer = newest
            .as_ref()
            .map_or(true, |(best, _)| modified > *best);
        if newer {
            newest = Some((modified, entry.into_path()));
        }
    }
    newest.map(|(_, path)| path)
}

/// Last `count` lines of `path`, oldest first.
pub fn tail_lines(path: &Path, count: usize) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut window = VecDeque::with_capacity(count.min(4096));
    for line in reader.split(b'\n') {
        let line = line?;
        if window.len() == count {
            window.pop_front();
        }
        if count > 0 {
            let text = String::from_utf8_lossy(&line);
            window.push_back(text.trim_end_matches('\r').to_string());
        }
    }
    Ok(window.into())
}
