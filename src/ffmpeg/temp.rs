use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Stateless factory for temp files. Callers own the returned paths and remove
/// them with `remove_temp_files` once the tool that reads them has exited.
#[derive(Debug, Default)]
pub struct TempFileManager;

/// Generates a short suffix for temp filenames. Not cryptographically secure; for uniqueness only.
fn random_alphanumeric_suffix(len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    static STATE: AtomicU64 = AtomicU64::new(0);
    let mut seed = STATE.fetch_add(1, Ordering::Relaxed) ^ u64::from(std::process::id()) << 16;
    let mut s = String::with_capacity(len);
    for _ in 0..len {
        s.push(CHARS[(seed % CHARS.len() as u64) as usize] as char);
        seed = seed / CHARS.len() as u64 + 7;
    }
    s
}

const CREATE_ATTEMPTS: usize = 16;

impl TempFileManager {
    pub fn create(&self, suffix: &str, content: Option<&[u8]>) -> io::Result<PathBuf> {
        self.create_in(&std::env::temp_dir(), suffix, content)
    }

    /// With `content`, the file is created exclusively: a name that already
    /// exists is never overwritten, a fresh one is tried instead.
    pub fn create_in(&self, dir: &Path, suffix: &str, content: Option<&[u8]>) -> io::Result<PathBuf> {
        for _ in 0..CREATE_ATTEMPTS {
            let millis = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            let name = format!(
                "vidqueue-{}-{}-{}",
                millis,
                random_alphanumeric_suffix(9),
                suffix
            );
            let path = dir.join(name);
            match content {
                Some(data) => match write_new(&path, data) {
                    Ok(()) => return Ok(path),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                    Err(e) => return Err(e),
                },
                None if path.exists() => continue,
                None => return Ok(path),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free temp file name in {}", dir.display()),
        ))
    }
}

fn write_new(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(data)
}

/// One line of an FFmpeg concat demuxer list: absolute path, forward slashes,
/// single quotes escaped as `'\''`.
pub fn concat_list_entry(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let escaped = absolute
        .to_string_lossy()
        .replace('\\', "/")
        .replace('\'', r"'\''");
    format!("file '{}'", escaped)
}

/// Writes a concat list for `inputs` to a fresh temp file.
pub fn write_concat_list(inputs: &[PathBuf]) -> io::Result<PathBuf> {
    let mut body = String::new();
    for input in inputs {
        body.push_str(&concat_list_entry(input));
        body.push('\n');
    }
    TempFileManager.create("concat.txt", Some(body.as_bytes()))
}

pub fn remove_temp_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path)
            && e.kind() != io::ErrorKind::NotFound
        {
            log::warn!(
                target: "vidqueue::temp",
                "Failed to remove temp file {}: {}",
                path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_names_are_unique() {
        let a = TempFileManager.create("x.txt", None).unwrap();
        let b = TempFileManager.create("x.txt", None).unwrap();
        assert_ne!(a, b);
        assert!(!a.exists());
    }

    #[test]
    fn existing_file_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let taken = dir.path().join("taken.txt");
        fs::write(&taken, b"keep").unwrap();
        let err = write_new(&taken, b"clobber").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&taken).unwrap(), b"keep");
    }

    #[test]
    fn created_files_are_distinct_and_hold_content() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..50)
            .map(|i| {
                TempFileManager
                    .create_in(dir.path(), "list.txt", Some(format!("{i}").as_bytes()))
                    .unwrap()
            })
            .collect();
        for (i, path) in paths.iter().enumerate() {
            assert_eq!(fs::read_to_string(path).unwrap(), i.to_string());
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 50);
    }

    #[cfg(unix)]
    #[test]
    fn concat_entry_escapes_quotes() {
        let entry = concat_list_entry(Path::new("/videos/it's here.mp4"));
        assert_eq!(entry, r"file '/videos/it'\''s here.mp4'");
    }

    #[test]
    fn concat_list_written_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![dir.path().join("a.mp4"), dir.path().join("b.mp4")];
        let list = write_concat_list(&inputs).unwrap();
        let body = fs::read_to_string(&list).unwrap();
        assert_eq!(body.lines().count(), 2);
        assert!(body.lines().all(|l| l.starts_with("file '") && l.ends_with('\'')));
        assert!(!body.contains('\\'));
        remove_temp_files(std::slice::from_ref(&list));
        assert!(!list.exists());
        remove_temp_files(&[list]);
    }
}
