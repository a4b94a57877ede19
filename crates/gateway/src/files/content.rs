//! Reading, writing and editing individual files.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::SystemTime;

use base64::Engine;
use protocol::messages::{
    EntryKind, FileContent, FilePayload, FileStat, Inserted, PathOutcome, Renamed, Replaced,
    Written, DEFAULT_READ_LENGTH,
};
use protocol::GatewayError;
use tracing::{info, warn};

use super::common::{ensure_parent, not_found_as, rename_in_place, unix_seconds};
use crate::sandbox::PathGuard;

/// Extensions `read_file` refuses to return, compared case-insensitively.
pub const BLOCKED_EXTENSIONS: &[&str] = &["pem", "key", "pfx", "sqlite", "db", "p12"];

/// Whether the file name carries a blocked extension.
pub fn is_blocked_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            BLOCKED_EXTENSIONS
                .iter()
                .any(|blocked| ext.eq_ignore_ascii_case(blocked))
        })
        .unwrap_or(false)
}

/// File operations confined to the session root.
#[derive(Debug, Clone)]
pub struct FileOps {
    guard: PathGuard,
    default_read_length: u64,
}

impl FileOps {
    /// Create file operations bound to a guard.
    pub fn new(guard: PathGuard) -> Self {
        Self {
            guard,
            default_read_length: DEFAULT_READ_LENGTH,
        }
    }

    /// Set the number of bytes `read_file` returns when no length is given.
    pub fn with_default_read_length(mut self, length: u64) -> Self {
        self.default_read_length = length;
        self
    }

    /// Read up to `length` bytes starting at `offset`.
    ///
    /// Bytes that decode as UTF-8 come back as text, anything else as
    /// standard base64. An offset past the end yields an empty read.
    pub fn read_file(
        &self,
        path: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<FileContent, GatewayError> {
        let file_path = self.guard.resolve(path)?;

        if !file_path.is_file() {
            return Err(GatewayError::NotFile(path.to_string()));
        }

        if is_blocked_extension(&file_path) {
            warn!(path, "refused read of blocked file type");
            return Err(GatewayError::BlockedExt(path.to_string()));
        }

        let length = length.unwrap_or(self.default_read_length);
        let mut file = File::open(&file_path)?;
        let file_size = file.metadata()?.len();

        file.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::new();
        file.take(length).read_to_end(&mut data)?;
        let bytes_read = data.len() as u64;

        let content = match String::from_utf8(data) {
            Ok(text) => FilePayload::Text(text),
            Err(e) => FilePayload::Base64(
                base64::engine::general_purpose::STANDARD.encode(e.into_bytes()),
            ),
        };

        info!(path, offset, bytes_read, "file read");
        Ok(FileContent {
            content,
            offset,
            length: bytes_read,
            file_size,
        })
    }

    /// Overwrite or append text, creating the file and its parents as needed.
    pub fn write_file(
        &self,
        path: &str,
        content: &str,
        append: bool,
    ) -> Result<Written, GatewayError> {
        let file_path = self.guard.resolve(path)?;

        if file_path.is_dir() {
            return Err(GatewayError::NotFile(path.to_string()));
        }
        ensure_parent(&file_path)?;

        let mut options = OpenOptions::new();
        if append {
            options.append(true).create(true);
        } else {
            options.write(true).create(true).truncate(true);
        }

        let mut file = options.open(&file_path)?;
        file.write_all(content.as_bytes())?;

        let chars_written = content.chars().count() as u64;
        info!(path, chars_written, append, "file written");

        Ok(Written {
            path: self.guard.relative(&file_path),
            chars_written,
            appended: append,
        })
    }

    /// Create a new file. Never overwrites.
    pub fn create_file(&self, path: &str, content: &str) -> Result<PathOutcome, GatewayError> {
        let file_path = self.guard.resolve(path)?;

        if fs::symlink_metadata(&file_path).is_ok() {
            return Err(GatewayError::AlreadyExists(path.to_string()));
        }
        ensure_parent(&file_path)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file_path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    GatewayError::AlreadyExists(path.to_string())
                } else {
                    GatewayError::Internal(e.to_string())
                }
            })?;
        file.write_all(content.as_bytes())?;

        info!(path, "file created");
        Ok(PathOutcome {
            path: self.guard.relative(&file_path),
        })
    }

    /// Rename a file within its parent directory.
    pub fn rename_file(&self, src_path: &str, new_name: &str) -> Result<Renamed, GatewayError> {
        let destination = rename_in_place(&self.guard, src_path, new_name, EntryKind::File)?;
        let new_path = self.guard.relative(&destination);

        info!(from = src_path, to = %new_path, "file renamed");
        Ok(Renamed { new_path })
    }

    /// Replace the first or every occurrence of `find_text`.
    ///
    /// Occurrences are counted without overlap.
    pub fn replace_in_file(
        &self,
        path: &str,
        find_text: &str,
        replace_with: &str,
        replace_all: bool,
    ) -> Result<Replaced, GatewayError> {
        let file_path = self.guard.resolve(path)?;
        let text = self.read_text(path, &file_path)?;

        if find_text.is_empty() {
            return Err(GatewayError::NotFound(String::new()));
        }

        let occurrences = text.matches(find_text).count();
        if occurrences == 0 {
            return Err(GatewayError::NotFound(find_text.to_string()));
        }

        let (updated, replaces_count) = if replace_all {
            (text.replace(find_text, replace_with), occurrences)
        } else {
            (text.replacen(find_text, replace_with, 1), 1)
        };
        fs::write(&file_path, updated)?;

        info!(path, replaces_count, "text replaced");
        Ok(Replaced {
            replaces_count: replaces_count as u64,
        })
    }

    /// Insert text as a new line before line `at_line` (1-indexed).
    ///
    /// Values below 1 insert at the top; values past the end append, adding
    /// a newline first if the file does not end with one. Line endings of
    /// existing lines are kept as they are.
    pub fn insert_into_file(
        &self,
        path: &str,
        content_to_insert: &str,
        at_line: i64,
    ) -> Result<Inserted, GatewayError> {
        let file_path = self.guard.resolve(path)?;
        let text = self.read_text(path, &file_path)?;
        let lines = split_lines_inclusive(&text);

        let target = usize::try_from(at_line.max(1)).unwrap_or(usize::MAX);

        let mut updated = String::with_capacity(text.len() + content_to_insert.len() + 1);
        let line_number = if target > lines.len() {
            updated.push_str(&text);
            if !text.is_empty() && !text.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(content_to_insert);
            lines.len() + 1
        } else {
            let (before, after) = lines.split_at(target - 1);
            updated.extend(before.iter().copied());
            updated.push_str(content_to_insert);
            updated.push('\n');
            updated.extend(after.iter().copied());
            target
        };

        fs::write(&file_path, updated)?;

        info!(path, line_number, "text inserted");
        Ok(Inserted {
            line_number: line_number as u64,
        })
    }

    /// Create the file if missing and set its modification time to now.
    pub fn touch_file(&self, path: &str) -> Result<PathOutcome, GatewayError> {
        let file_path = self.guard.resolve(path)?;

        if file_path.is_dir() {
            return Err(GatewayError::NotFile(path.to_string()));
        }
        ensure_parent(&file_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        file.set_modified(SystemTime::now())?;

        info!(path, "file touched");
        Ok(PathOutcome {
            path: self.guard.relative(&file_path),
        })
    }

    /// Size, type and timestamps of a file or directory.
    pub fn get_file_stat(&self, path: &str) -> Result<FileStat, GatewayError> {
        let file_path = self.guard.resolve(path)?;
        let metadata = fs::metadata(&file_path)
            .map_err(|e| not_found_as(e, GatewayError::NotExist(path.to_string())))?;

        Ok(FileStat {
            path: self.guard.relative(&file_path),
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            modified: unix_seconds(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
            created: metadata.created().ok().map(unix_seconds),
        })
    }

    fn read_text(&self, path: &str, file_path: &Path) -> Result<String, GatewayError> {
        if !file_path.is_file() {
            return Err(GatewayError::NotFile(path.to_string()));
        }
        String::from_utf8(fs::read(file_path)?)
            .map_err(|_| GatewayError::DecodeError(path.to_string()))
    }
}

/// Split text into lines, each keeping its terminator.
///
/// `\n`, `\r\n` and a lone `\r` all end a line. A trailing fragment without a
/// terminator is the last line.
fn split_lines_inclusive(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..=i]);
                start = i + 1;
            }
            b'\r' => {
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                lines.push(&text[start..=i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if start < bytes.len() {
        lines.push(&text[start..]);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SessionRoot;
    use protocol::ErrorKind;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileOps) {
        let temp_dir = TempDir::new().unwrap();
        let ops = FileOps::new(PathGuard::new(SessionRoot::new(temp_dir.path()).unwrap()));
        (temp_dir, ops)
    }

    // =========================================================================
    // read_file
    // =========================================================================

    #[test]
    fn test_read_text_window() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("a.txt"), "Hello, World!").unwrap();

        let whole = ops.read_file("a.txt", 0, None).unwrap();
        assert_eq!(whole.text(), Some("Hello, World!"));
        assert_eq!(whole.file_size, 13);
        assert_eq!(whole.length, 13);

        let window = ops.read_file("a.txt", 7, Some(5)).unwrap();
        assert_eq!(window.text(), Some("World"));
        assert_eq!(window.offset, 7);
        assert_eq!(window.length, 5);
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("a.txt"), "short").unwrap();

        let read = ops.read_file("a.txt", 1000, None).unwrap();
        assert_eq!(read.text(), Some(""));
        assert_eq!(read.length, 0);
        assert_eq!(read.file_size, 5);
    }

    #[test]
    fn test_read_binary_as_base64() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("blob.bin"), [0xffu8, 0xfe, 0x00, 0x01]).unwrap();

        let read = ops.read_file("blob.bin", 0, None).unwrap();
        assert!(!read.is_text());
        assert_eq!(read.content, FilePayload::Base64("//4AAQ==".to_string()));
    }

    #[test]
    fn test_read_default_length_applies() {
        let (temp_dir, ops) = setup();
        let ops = ops.with_default_read_length(4);
        fs::write(temp_dir.path().join("a.txt"), "abcdefgh").unwrap();

        let read = ops.read_file("a.txt", 0, None).unwrap();
        assert_eq!(read.text(), Some("abcd"));
    }

    #[test]
    fn test_read_blocked_extensions() {
        let (temp_dir, ops) = setup();
        for name in ["server.pem", "id.KEY", "cert.Pfx", "app.sqlite", "data.db", "x.p12"] {
            fs::write(temp_dir.path().join(name), "secret").unwrap();
            assert_eq!(
                ops.read_file(name, 0, None).unwrap_err().kind(),
                ErrorKind::BlockedExt,
                "{name}"
            );
        }
    }

    #[test]
    fn test_read_missing_or_directory() {
        let (temp_dir, ops) = setup();
        fs::create_dir(temp_dir.path().join("dir")).unwrap();

        for path in ["nope.txt", "dir"] {
            let err = ops.read_file(path, 0, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFile, "{path}");
        }
        // Missing file with a blocked extension still reports NOT_FILE
        let err = ops.read_file("gone.pem", 0, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFile);
    }

    // =========================================================================
    // write_file / create_file
    // =========================================================================

    #[test]
    fn test_write_creates_parents_and_appends() {
        let (temp_dir, ops) = setup();

        let written = ops.write_file("deep/dir/notes.txt", "héllo", false).unwrap();
        assert_eq!(written.chars_written, 5);
        assert!(!written.appended);
        assert_eq!(written.path, "deep/dir/notes.txt");

        ops.write_file("deep/dir/notes.txt", " world", true).unwrap();
        let content = fs::read_to_string(temp_dir.path().join("deep/dir/notes.txt")).unwrap();
        assert_eq!(content, "héllo world");

        ops.write_file("deep/dir/notes.txt", "reset", false).unwrap();
        let content = fs::read_to_string(temp_dir.path().join("deep/dir/notes.txt")).unwrap();
        assert_eq!(content, "reset");
    }

    #[test]
    fn test_write_outside_root() {
        let (_temp_dir, ops) = setup();
        assert_eq!(
            ops.write_file("../escape.txt", "x", false).unwrap_err().kind(),
            ErrorKind::OutsideRoot
        );
    }

    #[test]
    fn test_create_file_never_overwrites() {
        let (temp_dir, ops) = setup();

        ops.create_file("new/file.txt", "first").unwrap();
        assert_eq!(
            ops.create_file("new/file.txt", "second").unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        let content = fs::read_to_string(temp_dir.path().join("new/file.txt")).unwrap();
        assert_eq!(content, "first");

        ops.create_file("empty.txt", "").unwrap();
        assert_eq!(fs::metadata(temp_dir.path().join("empty.txt")).unwrap().len(), 0);
    }

    #[test]
    fn test_rename_file() {
        let (temp_dir, ops) = setup();
        fs::create_dir(temp_dir.path().join("docs")).unwrap();
        fs::write(temp_dir.path().join("docs/a.md"), "x").unwrap();
        fs::write(temp_dir.path().join("docs/taken.md"), "y").unwrap();

        let renamed = ops.rename_file("docs/a.md", "b.md").unwrap();
        assert_eq!(renamed.new_path, "docs/b.md");
        assert!(temp_dir.path().join("docs/b.md").is_file());

        assert_eq!(
            ops.rename_file("docs/b.md", "taken.md").unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            ops.rename_file("docs", "other").unwrap_err().kind(),
            ErrorKind::NotFile
        );
        assert_eq!(
            ops.rename_file("docs/b.md", "..").unwrap_err().kind(),
            ErrorKind::InvalidName
        );
    }

    // =========================================================================
    // replace_in_file / insert_into_file
    // =========================================================================

    #[test]
    fn test_replace_first_and_all() {
        let (temp_dir, ops) = setup();
        let path = temp_dir.path().join("r.txt");
        fs::write(&path, "a-a-a").unwrap();

        let first = ops.replace_in_file("r.txt", "a", "b", false).unwrap();
        assert_eq!(first.replaces_count, 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "b-a-a");

        let all = ops.replace_in_file("r.txt", "a", "c", true).unwrap();
        assert_eq!(all.replaces_count, 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "b-c-c");
    }

    #[test]
    fn test_replace_counts_non_overlapping() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("r.txt"), "aaaa").unwrap();

        let all = ops.replace_in_file("r.txt", "aa", "b", true).unwrap();
        assert_eq!(all.replaces_count, 2);
        assert_eq!(fs::read_to_string(temp_dir.path().join("r.txt")).unwrap(), "bb");
    }

    #[test]
    fn test_replace_errors() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("r.txt"), "content").unwrap();
        fs::write(temp_dir.path().join("bin"), [0xffu8, 0x00]).unwrap();

        assert_eq!(
            ops.replace_in_file("r.txt", "absent", "x", true).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ops.replace_in_file("bin", "a", "b", true).unwrap_err().kind(),
            ErrorKind::DecodeError
        );
        assert_eq!(
            ops.replace_in_file("missing", "a", "b", true).unwrap_err().kind(),
            ErrorKind::NotFile
        );
        // File untouched after a failed replace
        assert_eq!(fs::read_to_string(temp_dir.path().join("r.txt")).unwrap(), "content");
    }

    #[test]
    fn test_insert_positions() {
        let (temp_dir, ops) = setup();
        let path = temp_dir.path().join("lines.txt");

        fs::write(&path, "one\ntwo\nthree\n").unwrap();
        let inserted = ops.insert_into_file("lines.txt", "zero", 1).unwrap();
        assert_eq!(inserted.line_number, 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "zero\none\ntwo\nthree\n");

        fs::write(&path, "one\ntwo\nthree\n").unwrap();
        ops.insert_into_file("lines.txt", "middle", 2).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\nmiddle\ntwo\nthree\n");

        fs::write(&path, "one\ntwo\nthree\n").unwrap();
        ops.insert_into_file("lines.txt", "top", -5).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "top\none\ntwo\nthree\n");
    }

    #[test]
    fn test_insert_appends_past_end() {
        let (temp_dir, ops) = setup();
        let path = temp_dir.path().join("lines.txt");

        fs::write(&path, "one\ntwo").unwrap();
        let inserted = ops.insert_into_file("lines.txt", "three", 99).unwrap();
        assert_eq!(inserted.line_number, 3);
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\nthree");

        fs::write(&path, "").unwrap();
        let inserted = ops.insert_into_file("lines.txt", "first", 5).unwrap();
        assert_eq!(inserted.line_number, 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");
    }

    #[test]
    fn test_insert_keeps_crlf() {
        let (temp_dir, ops) = setup();
        let path = temp_dir.path().join("dos.txt");
        fs::write(&path, "a\r\nb\r\n").unwrap();

        ops.insert_into_file("dos.txt", "x", 2).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\r\nx\nb\r\n");
    }

    #[test]
    fn test_split_lines_inclusive() {
        assert_eq!(split_lines_inclusive(""), Vec::<&str>::new());
        assert_eq!(split_lines_inclusive("a\nb"), vec!["a\n", "b"]);
        assert_eq!(split_lines_inclusive("a\r\nb\rc\n"), vec!["a\r\n", "b\r", "c\n"]);
    }

    // =========================================================================
    // touch_file / get_file_stat
    // =========================================================================

    #[test]
    fn test_touch_creates_and_updates() {
        let (temp_dir, ops) = setup();
        let path = temp_dir.path().join("t.txt");

        ops.touch_file("t.txt").unwrap();
        assert!(path.is_file());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        fs::write(&path, "keep").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        File::options().write(true).open(&path).unwrap().set_modified(old).unwrap();

        ops.touch_file("t.txt").unwrap();
        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        assert!(modified > old + Duration::from_secs(1800));
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep");
    }

    #[test]
    fn test_touch_directory_rejected() {
        let (temp_dir, ops) = setup();
        fs::create_dir(temp_dir.path().join("d")).unwrap();
        assert_eq!(ops.touch_file("d").unwrap_err().kind(), ErrorKind::NotFile);
    }

    #[test]
    fn test_get_file_stat() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("s.txt"), "12345").unwrap();
        fs::create_dir(temp_dir.path().join("d")).unwrap();

        let stat = ops.get_file_stat("s.txt").unwrap();
        assert_eq!(stat.size, 5);
        assert!(!stat.is_dir);
        assert!(stat.modified > 0);

        assert!(ops.get_file_stat("d").unwrap().is_dir);
        assert_eq!(ops.get_file_stat("none").unwrap_err().kind(), ErrorKind::NotExist);
    }

    #[test]
    fn test_blocked_extension_helper() {
        assert!(is_blocked_extension(Path::new("a/b.PEM")));
        assert!(!is_blocked_extension(Path::new("notes.txt")));
        assert!(!is_blocked_extension(Path::new("Makefile")));
    }
}
