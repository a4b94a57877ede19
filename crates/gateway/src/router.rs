//! Request router for dispatching operations to their components.
//!
//! This module provides the [`Gateway`] struct that owns the operation catalog
//! and routes each [`Request`] to the component that implements it. The
//! catalog only exists once a session root has been installed; before that
//! every request fails with `NOT_INITIALIZED`.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use protocol::messages::{DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_READ_LENGTH};
use protocol::{
    Envelope, GatewayError, Outcome, Request, ResponseEnvelope, OPERATIONS, PROTOCOL_VERSION,
};
use tracing::{debug, error, info, warn};

use crate::command::{default_shell, CommandRunner};
use crate::config::Config;
use crate::files::{ArchiveOps, DirectoryOps, FileOps, SearchOps, TransferOps};
use crate::sandbox::{PathGuard, SessionRoot};

/// Settings applied to the catalog when the root is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSettings {
    /// Bytes `read_file` returns when no length is requested.
    pub default_read_length: u64,
    /// Shell used by `run_command`.
    pub shell: String,
    /// Timeout used when a command request passes 0.
    pub default_timeout: Duration,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            default_read_length: DEFAULT_READ_LENGTH,
            shell: default_shell(),
            default_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

impl From<&Config> for OperationSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_read_length: config.file.default_read_length,
            shell: config.command.shell.clone(),
            default_timeout: Duration::from_secs(config.command.default_timeout),
        }
    }
}

/// The operation components, all sharing one guard.
#[derive(Debug)]
struct Catalog {
    guard: PathGuard,
    directories: DirectoryOps,
    files: FileOps,
    search: SearchOps,
    transfers: TransferOps,
    archives: ArchiveOps,
    commands: CommandRunner,
}

impl Catalog {
    fn new(root: SessionRoot, settings: &OperationSettings) -> Self {
        let guard = PathGuard::new(root);
        Self {
            directories: DirectoryOps::new(guard.clone()),
            files: FileOps::new(guard.clone())
                .with_default_read_length(settings.default_read_length),
            search: SearchOps::new(guard.clone()),
            transfers: TransferOps::new(guard.clone()),
            archives: ArchiveOps::new(guard.clone()),
            commands: CommandRunner::new(guard.clone())
                .with_shell(settings.shell.clone())
                .with_default_timeout(settings.default_timeout),
            guard,
        }
    }
}

/// Entry point for all operations.
///
/// The session root can be installed exactly once; the gateway is usable
/// from many tasks at the same time after that.
#[derive(Debug, Default)]
pub struct Gateway {
    settings: OperationSettings,
    catalog: OnceLock<Catalog>,
}

impl Gateway {
    /// Create a gateway without a root.
    pub fn new(settings: OperationSettings) -> Self {
        Self {
            settings,
            catalog: OnceLock::new(),
        }
    }

    /// Create a gateway configured from `config`, installing its root if set.
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let gateway = Self::new(OperationSettings::from(config));
        if let Some(root) = &config.gateway.root {
            gateway.install_root(root)?;
        }
        Ok(gateway)
    }

    /// Set the session root. Fails if the path is not an existing directory
    /// or a root is already installed.
    pub fn install_root<P: AsRef<Path>>(&self, root: P) -> Result<&Path, GatewayError> {
        let session_root = SessionRoot::new(root)?;

        if let Some(existing) = self.root() {
            warn!(root = %existing.display(), "session root already installed");
            return Err(GatewayError::AlreadyExists(format!(
                "session root {}",
                existing.display()
            )));
        }

        let catalog = Catalog::new(session_root, &self.settings);
        if self.catalog.set(catalog).is_err() {
            return Err(GatewayError::AlreadyExists("session root".to_string()));
        }

        let root = self.root().ok_or(GatewayError::NotInitialized)?;
        info!(root = %root.display(), "session root installed");
        Ok(root)
    }

    /// The installed session root, if any.
    pub fn root(&self) -> Option<&Path> {
        self.catalog.get().map(|c| c.guard.root())
    }

    /// Whether a session root has been installed.
    pub fn is_initialized(&self) -> bool {
        self.catalog.get().is_some()
    }

    /// Names of every operation the gateway serves.
    pub fn operations(&self) -> &'static [&'static str] {
        OPERATIONS
    }

    /// Handle one request envelope, never failing: errors are carried in the
    /// response body.
    pub async fn handle(&self, envelope: Envelope) -> ResponseEnvelope {
        let sequence = envelope.sequence;

        if envelope.version != PROTOCOL_VERSION {
            warn!(version = envelope.version, "unsupported protocol version");
            let err = GatewayError::Internal(format!(
                "unsupported protocol version {} (expected {})",
                envelope.version, PROTOCOL_VERSION
            ));
            return ResponseEnvelope::error(sequence, err.into());
        }

        match self.dispatch(envelope.request).await {
            Ok(outcome) => ResponseEnvelope::ok(sequence, outcome),
            Err(err) => ResponseEnvelope::error(sequence, err.into()),
        }
    }

    /// Run a single request against the catalog.
    pub async fn dispatch(&self, request: Request) -> Result<Outcome, GatewayError> {
        let op = request.op_name();

        let Some(catalog) = self.catalog.get() else {
            warn!(op, "request before session root was installed");
            return Err(GatewayError::NotInitialized);
        };

        debug!(?request, "routing request");
        let result = Self::route(catalog, request).await;

        match &result {
            Ok(_) => debug!(op, "request succeeded"),
            Err(e) => error!(op, kind = %e.kind(), error = %e, "request failed"),
        }
        result
    }

    async fn route(catalog: &Catalog, request: Request) -> Result<Outcome, GatewayError> {
        match request {
            // Directories
            Request::ListDir(req) => catalog.directories.list_dir(&req.path).map(Outcome::ListDir),
            Request::CreateDir(req) => catalog
                .directories
                .create_dir(&req.path)
                .map(Outcome::CreateDir),
            Request::GetDirSize(req) => catalog
                .directories
                .get_dir_size(&req.path)
                .map(Outcome::GetDirSize),
            Request::RenameDir(req) => catalog
                .directories
                .rename_dir(&req.src_path, &req.new_name)
                .map(Outcome::RenameDir),

            // Files
            Request::ReadFile(req) => catalog
                .files
                .read_file(&req.path, req.offset, req.length)
                .map(Outcome::ReadFile),
            Request::WriteFile(req) => catalog
                .files
                .write_file(&req.path, &req.content, req.append)
                .map(Outcome::WriteFile),
            Request::CreateFile(req) => catalog
                .files
                .create_file(&req.path, &req.content)
                .map(Outcome::CreateFile),
            Request::RenameFile(req) => catalog
                .files
                .rename_file(&req.src_path, &req.new_name)
                .map(Outcome::RenameFile),
            Request::ReplaceInFile(req) => catalog
                .files
                .replace_in_file(&req.path, &req.find_text, &req.replace_with, req.replace_all)
                .map(Outcome::ReplaceInFile),
            Request::InsertIntoFile(req) => catalog
                .files
                .insert_into_file(&req.path, &req.content_to_insert, req.at_line)
                .map(Outcome::InsertIntoFile),
            Request::TouchFile(req) => catalog.files.touch_file(&req.path).map(Outcome::TouchFile),
            Request::GetFileStat(req) => catalog
                .files
                .get_file_stat(&req.path)
                .map(Outcome::GetFileStat),

            // Search
            Request::FindFiles(req) => catalog
                .search
                .find_files(&req.pattern, &req.base_path)
                .map(Outcome::FindFiles),
            Request::SearchInFiles(req) => catalog
                .search
                .search_in_files(&req.search_text, &req.glob_pattern, &req.base_path)
                .map(Outcome::SearchInFiles),
            Request::CalculateHash(req) => catalog
                .search
                .calculate_hash(&req.path, &req.algorithm)
                .map(Outcome::CalculateHash),

            // Transfers
            Request::CopyPath(req) => catalog
                .transfers
                .copy_path(&req.src, &req.dst)
                .map(Outcome::CopyPath),
            Request::MovePath(req) => catalog
                .transfers
                .move_path(&req.src, &req.dst)
                .map(Outcome::MovePath),
            Request::DeletePath(req) => catalog
                .transfers
                .delete_path(&req.path)
                .map(Outcome::DeletePath),

            // Archives
            Request::ZipFiles(req) => catalog
                .archives
                .zip_files(&req.archive_path, &req.files_to_add, &req.base_dir)
                .map(Outcome::ZipFiles),
            Request::UnzipFile(req) => catalog
                .archives
                .unzip_file(&req.archive_path, &req.extract_to_dir)
                .map(Outcome::UnzipFile),

            // Commands
            Request::RunCommand(req) => catalog
                .commands
                .run_command(&req.cmd, &req.cwd, req.timeout)
                .await
                .map(Outcome::RunCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::messages::{CreateDir, ListDir, WriteFile};
    use protocol::{ErrorKind, ResponseBody};
    use tempfile::TempDir;

    fn installed() -> (TempDir, Gateway) {
        let temp_dir = TempDir::new().unwrap();
        let gateway = Gateway::default();
        gateway.install_root(temp_dir.path()).unwrap();
        (temp_dir, gateway)
    }

    #[tokio::test]
    async fn test_requests_before_install_fail() {
        let gateway = Gateway::default();
        assert!(!gateway.is_initialized());

        let err = gateway
            .dispatch(Request::ListDir(ListDir::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
    }

    #[test]
    fn test_install_root_once() {
        let temp_dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let gateway = Gateway::default();

        let root = gateway.install_root(temp_dir.path()).unwrap().to_path_buf();
        assert_eq!(root, std::fs::canonicalize(temp_dir.path()).unwrap());

        let err = gateway.install_root(other.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(gateway.root(), Some(root.as_path()));
    }

    #[test]
    fn test_install_root_rejects_missing_dir() {
        let gateway = Gateway::default();
        let err = gateway.install_root("/nonexistent/rootgate/root").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotDir);
        assert!(!gateway.is_initialized());
    }

    #[tokio::test]
    async fn test_handle_success_echoes_sequence() {
        let (temp_dir, gateway) = installed();

        let response = gateway
            .handle(Envelope::new(
                42,
                Request::CreateDir(CreateDir {
                    path: "made".to_string(),
                }),
            ))
            .await;

        assert_eq!(response.sequence, 42);
        assert!(matches!(response.body, ResponseBody::Ok(Outcome::CreateDir(_))));
        assert!(temp_dir.path().join("made").is_dir());
    }

    #[tokio::test]
    async fn test_handle_error_is_tagged() {
        let (_temp_dir, gateway) = installed();

        let response = gateway
            .handle(Envelope::new(
                7,
                Request::WriteFile(WriteFile {
                    path: "../escape.txt".to_string(),
                    content: "x".to_string(),
                    append: false,
                }),
            ))
            .await;

        match response.body {
            ResponseBody::Error(err) => assert_eq!(err.kind, ErrorKind::OutsideRoot),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_rejects_unknown_version() {
        let (_temp_dir, gateway) = installed();

        let mut envelope = Envelope::new(1, Request::ListDir(ListDir::default()));
        envelope.version = PROTOCOL_VERSION + 1;

        let response = gateway.handle(envelope).await;
        assert!(matches!(response.body, ResponseBody::Error(_)));
    }

    #[tokio::test]
    async fn test_dispatch_from_json_parts() {
        let (_temp_dir, gateway) = installed();

        let request = Request::from_parts(
            "write_file",
            serde_json::json!({ "path": "note.txt", "content": "hello" }),
        )
        .unwrap();
        gateway.dispatch(request).await.unwrap();

        let request =
            Request::from_parts("read_file", serde_json::json!({ "path": "note.txt" })).unwrap();
        match gateway.dispatch(request).await.unwrap() {
            Outcome::ReadFile(content) => assert_eq!(content.text(), Some("hello")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_settings_applied() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "abcdef").unwrap();

        let gateway = Gateway::new(OperationSettings {
            default_read_length: 3,
            ..OperationSettings::default()
        });
        gateway.install_root(temp_dir.path()).unwrap();

        let catalog = gateway.catalog.get().unwrap();
        let read = catalog.files.read_file("a.txt", 0, None).unwrap();
        assert_eq!(read.text(), Some("abc"));
    }

    #[test]
    fn test_operations_listed() {
        let gateway = Gateway::default();
        let ops = gateway.operations();
        assert_eq!(ops.len(), 21);
        assert!(ops.contains(&"run_command"));
        assert!(ops.contains(&"get_file_stat"));
    }
}
