//! Operation request and result definitions for rootgate.
//!
//! A host sends one [`Envelope`] per operation call and gets exactly one
//! [`ResponseEnvelope`] back. Requests are adjacently tagged by operation name
//! (`{"op": "read_file", "params": {...}}`); parameters that the caller may
//! omit carry their documented defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorMessage;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default number of bytes returned by `read_file`.
pub const DEFAULT_READ_LENGTH: u64 = 2_000_000;

/// Default command timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Default hash algorithm.
pub const DEFAULT_HASH_ALGORITHM: &str = "sha256";

/// Names of every operation in the catalog, in catalog order.
pub const OPERATIONS: &[&str] = &[
    "list_dir",
    "create_dir",
    "get_dir_size",
    "rename_dir",
    "read_file",
    "write_file",
    "create_file",
    "rename_file",
    "replace_in_file",
    "insert_into_file",
    "touch_file",
    "get_file_stat",
    "find_files",
    "search_in_files",
    "calculate_hash",
    "copy_path",
    "move_path",
    "delete_path",
    "zip_files",
    "unzip_file",
    "run_command",
];

fn current_dir() -> String {
    ".".to_string()
}

fn match_all() -> String {
    "*".to_string()
}

fn default_hash_algorithm() -> String {
    DEFAULT_HASH_ALGORITHM.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

/// Envelope wrapper for a single operation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number echoed back in the response.
    pub sequence: u64,
    /// The requested operation.
    pub request: Request,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, request: Request) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            request,
        }
    }

    /// Serialize the envelope to MessagePack bytes.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Envelope wrapper for the answer to one operation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Protocol version.
    pub version: u8,
    /// Sequence number of the request this answers.
    pub sequence: u64,
    /// Result or error.
    pub body: ResponseBody,
}

impl ResponseEnvelope {
    /// Wrap a successful outcome.
    pub fn ok(sequence: u64, outcome: Outcome) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            body: ResponseBody::Ok(outcome),
        }
    }

    /// Wrap an error.
    pub fn error(sequence: u64, error: ErrorMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            body: ResponseBody::Error(error),
        }
    }

    /// Serialize the envelope to MessagePack bytes.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Either the operation's typed result or a tagged error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    Ok(Outcome),
    Error(ErrorMessage),
}

/// Every operation the gateway exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "params", rename_all = "snake_case")]
pub enum Request {
    // Directory operations
    ListDir(ListDir),
    CreateDir(CreateDir),
    GetDirSize(GetDirSize),
    RenameDir(Rename),

    // File operations
    ReadFile(ReadFile),
    WriteFile(WriteFile),
    CreateFile(CreateFile),
    RenameFile(Rename),
    ReplaceInFile(ReplaceInFile),
    InsertIntoFile(InsertIntoFile),
    TouchFile(TouchFile),
    GetFileStat(GetFileStat),

    // Search operations
    FindFiles(FindFiles),
    SearchInFiles(SearchInFiles),
    CalculateHash(CalculateHash),

    // Transfer operations
    CopyPath(CopyPath),
    MovePath(MovePath),
    DeletePath(DeletePath),

    // Archives
    ZipFiles(ZipFiles),
    UnzipFile(UnzipFile),

    // Commands
    RunCommand(RunCommand),
}

impl Request {
    /// The operation name as it appears on the wire.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::ListDir(_) => "list_dir",
            Self::CreateDir(_) => "create_dir",
            Self::GetDirSize(_) => "get_dir_size",
            Self::RenameDir(_) => "rename_dir",
            Self::ReadFile(_) => "read_file",
            Self::WriteFile(_) => "write_file",
            Self::CreateFile(_) => "create_file",
            Self::RenameFile(_) => "rename_file",
            Self::ReplaceInFile(_) => "replace_in_file",
            Self::InsertIntoFile(_) => "insert_into_file",
            Self::TouchFile(_) => "touch_file",
            Self::GetFileStat(_) => "get_file_stat",
            Self::FindFiles(_) => "find_files",
            Self::SearchInFiles(_) => "search_in_files",
            Self::CalculateHash(_) => "calculate_hash",
            Self::CopyPath(_) => "copy_path",
            Self::MovePath(_) => "move_path",
            Self::DeletePath(_) => "delete_path",
            Self::ZipFiles(_) => "zip_files",
            Self::UnzipFile(_) => "unzip_file",
            Self::RunCommand(_) => "run_command",
        }
    }

    /// Build a request from an operation name and its JSON parameters.
    pub fn from_parts(op: &str, params: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "op": op, "params": params }))
    }
}

// -----------------------------------------------------------------------------
// Request parameters
// -----------------------------------------------------------------------------

/// List the immediate children of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDir {
    #[serde(default = "current_dir")]
    pub path: String,
}

impl Default for ListDir {
    fn default() -> Self {
        Self { path: current_dir() }
    }
}

/// Create a directory and any missing ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDir {
    pub path: String,
}

/// Total size of the regular files below a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDirSize {
    #[serde(default = "current_dir")]
    pub path: String,
}

impl Default for GetDirSize {
    fn default() -> Self {
        Self { path: current_dir() }
    }
}

/// Rename a file or directory within its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    /// Path of the entry to rename.
    pub src_path: String,
    /// New bare name (no separators).
    pub new_name: String,
}

/// Read a byte range of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFile {
    pub path: String,
    #[serde(default)]
    pub offset: u64,
    /// Maximum bytes to read. `None` uses the configured default.
    #[serde(default)]
    pub length: Option<u64>,
}

/// Write or append text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFile {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub append: bool,
}

/// Create a new file, failing if it exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFile {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

/// Literal text replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceInFile {
    pub path: String,
    pub find_text: String,
    pub replace_with: String,
    #[serde(default)]
    pub replace_all: bool,
}

/// Insert text at a 1-indexed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertIntoFile {
    pub path: String,
    pub content_to_insert: String,
    pub at_line: i64,
}

/// Create a file or bump its modification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchFile {
    pub path: String,
}

/// Metadata for a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetFileStat {
    pub path: String,
}

/// Recursive glob search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindFiles {
    pub pattern: String,
    #[serde(default = "current_dir")]
    pub base_path: String,
}

/// Literal content search over files matching a glob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchInFiles {
    pub search_text: String,
    #[serde(default = "match_all")]
    pub glob_pattern: String,
    #[serde(default = "current_dir")]
    pub base_path: String,
}

/// Streaming file digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateHash {
    pub path: String,
    #[serde(default = "default_hash_algorithm")]
    pub algorithm: String,
}

/// Copy a file or directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyPath {
    pub src: String,
    pub dst: String,
}

/// Move a file or directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePath {
    pub src: String,
    pub dst: String,
}

/// Delete a file or directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePath {
    pub path: String,
}

/// Build a zip archive from a list of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipFiles {
    pub archive_path: String,
    pub files_to_add: Vec<String>,
    #[serde(default = "current_dir")]
    pub base_dir: String,
}

/// Extract a zip archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnzipFile {
    pub archive_path: String,
    pub extract_to_dir: String,
}

/// Run a shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommand {
    pub cmd: String,
    #[serde(default = "current_dir")]
    pub cwd: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

// -----------------------------------------------------------------------------
// Results
// -----------------------------------------------------------------------------

/// Typed result of a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "result", rename_all = "snake_case")]
pub enum Outcome {
    ListDir(DirListing),
    CreateDir(PathOutcome),
    GetDirSize(DirSize),
    RenameDir(Renamed),
    ReadFile(FileContent),
    WriteFile(Written),
    CreateFile(PathOutcome),
    RenameFile(Renamed),
    ReplaceInFile(Replaced),
    InsertIntoFile(Inserted),
    TouchFile(PathOutcome),
    GetFileStat(FileStat),
    FindFiles(FoundFiles),
    SearchInFiles(SearchResults),
    CalculateHash(HashDigest),
    CopyPath(Transferred),
    MovePath(Transferred),
    DeletePath(Deleted),
    ZipFiles(ArchiveCreated),
    UnzipFile(ArchiveExtracted),
    RunCommand(CommandOutput),
}

/// A directory entry with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Path relative to the session root.
    pub path: String,
    /// Whether this entry is a directory.
    pub is_dir: bool,
    /// Size in bytes; absent for directories.
    pub size: Option<u64>,
    /// Last modified time as Unix seconds.
    pub modified: u64,
}

/// Directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirListing {
    pub path: String,
    pub items: Vec<DirEntry>,
}

/// Result carrying only the affected path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOutcome {
    pub path: String,
}

/// Recursive directory size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirSize {
    pub path: String,
    pub total_size_bytes: u64,
}

/// Rename result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renamed {
    pub new_path: String,
}

/// Payload of a file read, chosen by whether the bytes decode as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "snake_case")]
pub enum FilePayload {
    Text(String),
    Base64(String),
}

/// Result of `read_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub content: FilePayload,
    /// Byte offset the read started at.
    pub offset: u64,
    /// Number of bytes actually read.
    pub length: u64,
    /// Total size of the file in bytes.
    pub file_size: u64,
}

impl FileContent {
    /// Whether the bytes were returned as text.
    pub fn is_text(&self) -> bool {
        matches!(self.content, FilePayload::Text(_))
    }

    /// The text payload, if the read decoded as UTF-8.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            FilePayload::Text(text) => Some(text),
            FilePayload::Base64(_) => None,
        }
    }
}

/// Result of `write_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Written {
    pub path: String,
    pub chars_written: u64,
    pub appended: bool,
}

/// Result of `replace_in_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replaced {
    pub replaces_count: u64,
}

/// Result of `insert_into_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inserted {
    /// 1-indexed line at which the inserted text now starts.
    pub line_number: u64,
}

/// Metadata for a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    /// Last modified time as Unix seconds.
    pub modified: u64,
    /// Creation time as Unix seconds, where the platform records it.
    pub created: Option<u64>,
}

/// Result of `find_files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundFiles {
    pub found_files: Vec<String>,
    pub count: u64,
}

/// A single matching line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMatch {
    pub line_number: u64,
    pub line_content: String,
}

/// Result of `search_in_files`, keyed by root-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    pub search_results: BTreeMap<String, Vec<LineMatch>>,
    pub files_with_matches: u64,
    pub files_searched: u64,
}

/// Result of `calculate_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    pub algorithm: String,
    /// Lowercase hex digest.
    pub hash: String,
}

/// What kind of entry a transfer touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Result of `copy_path` and `move_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transferred {
    pub kind: EntryKind,
    /// Final root-relative destination.
    pub destination: String,
}

/// Result of `delete_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    pub kind: EntryKind,
}

/// Result of `zip_files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveCreated {
    pub archive_path: String,
    /// Number of file entries written.
    pub files_added: u64,
}

/// Result of `unzip_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveExtracted {
    pub extract_dir: String,
    pub entries: u64,
}

/// Captured output of a shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code; `-1` on timeout, `-signal` when killed by a signal.
    pub exit_code: i32,
    pub timed_out: bool,
}
