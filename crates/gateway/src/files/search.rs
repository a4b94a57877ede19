//! Glob lookup, text search and file hashing.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;

use protocol::messages::{FoundFiles, HashDigest, LineMatch, SearchResults};
use protocol::GatewayError;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use tracing::{debug, info};

use super::common::{matching_files, recursive_pattern};
use crate::sandbox::PathGuard;

/// Read size used while hashing (64 KB).
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Parse an algorithm name, ignoring case and `-`/`_` separators.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "md5" => Some(Self::Md5),
            "sha1" => Some(Self::Sha1),
            "sha224" => Some(Self::Sha224),
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

/// Incremental hasher over any supported algorithm.
enum Hasher {
    Md5(md5::Context),
    Sha1(sha1::Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            HashAlgorithm::Sha1 => Self::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha224 => Self::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Self::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha224(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Search operations confined to the session root.
#[derive(Debug, Clone)]
pub struct SearchOps {
    guard: PathGuard,
}

impl SearchOps {
    /// Create search operations bound to a guard.
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    /// Regular files below `base_path` matching `pattern` at any depth.
    pub fn find_files(&self, pattern: &str, base_path: &str) -> Result<FoundFiles, GatewayError> {
        let base = self.guard.resolve(base_path)?;
        if !base.is_dir() {
            return Err(GatewayError::NotDir(base_path.to_string()));
        }

        let glob = recursive_pattern(pattern)?;
        let found_files: Vec<String> = matching_files(&base, &glob)
            .iter()
            .map(|path| self.guard.relative(path))
            .collect();

        info!(pattern, base_path, count = found_files.len(), "files found");
        Ok(FoundFiles {
            count: found_files.len() as u64,
            found_files,
        })
    }

    /// Lines containing `search_text` in every UTF-8 file matching the glob.
    ///
    /// Every matching regular file counts toward `files_searched`, but one
    /// that cannot be read or is not valid UTF-8 contributes no matches. Lines
    /// end at `\n`, `\r\n` or a lone `\r`. Matched lines are reported
    /// trimmed, with 1-indexed numbers.
    pub fn search_in_files(
        &self,
        search_text: &str,
        glob_pattern: &str,
        base_path: &str,
    ) -> Result<SearchResults, GatewayError> {
        let base = self.guard.resolve(base_path)?;
        if !base.is_dir() {
            return Err(GatewayError::NotDir(base_path.to_string()));
        }

        let glob = recursive_pattern(glob_pattern)?;
        let mut search_results = BTreeMap::new();
        let mut files_searched: u64 = 0;

        for path in matching_files(&base, &glob) {
            files_searched += 1;
            let text = match fs::read(&path).map(String::from_utf8) {
                Ok(Ok(text)) => text,
                Ok(Err(_)) => {
                    debug!(path = %path.display(), "skipping non-UTF-8 file");
                    continue;
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };

            let matches: Vec<LineMatch> = universal_lines(&text)
                .into_iter()
                .enumerate()
                .filter(|(_, line)| line.contains(search_text))
                .map(|(index, line)| LineMatch {
                    line_number: index as u64 + 1,
                    line_content: line.trim().to_string(),
                })
                .collect();

            if !matches.is_empty() {
                search_results.insert(self.guard.relative(&path), matches);
            }
        }

        let files_with_matches = search_results.len() as u64;
        info!(
            glob_pattern,
            base_path, files_searched, files_with_matches, "search complete"
        );

        Ok(SearchResults {
            search_results,
            files_with_matches,
            files_searched,
        })
    }

    /// Hex digest of a file's contents, streamed in fixed-size chunks.
    pub fn calculate_hash(&self, path: &str, algorithm: &str) -> Result<HashDigest, GatewayError> {
        let algorithm = HashAlgorithm::parse(algorithm)
            .ok_or_else(|| GatewayError::InvalidAlgorithm(algorithm.to_string()))?;

        let file_path = self.guard.resolve(path)?;
        if !file_path.is_file() {
            return Err(GatewayError::NotFile(path.to_string()));
        }

        let mut file = File::open(&file_path)?;
        let mut hasher = Hasher::new(algorithm);
        let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        let hash = hasher.finalize_hex();
        info!(path, algorithm = algorithm.as_str(), "hash calculated");

        Ok(HashDigest {
            algorithm: algorithm.as_str().to_string(),
            hash,
        })
    }
}

/// Split text into lines the way universal-newline readers do.
fn universal_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
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
    use tempfile::TempDir;

    fn setup() -> (TempDir, SearchOps) {
        let temp_dir = TempDir::new().unwrap();
        let ops = SearchOps::new(PathGuard::new(SessionRoot::new(temp_dir.path()).unwrap()));
        (temp_dir, ops)
    }

    fn seed_tree(root: &std::path::Path) {
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("README.md"), "# Title\nTODO: write docs\n").unwrap();
        fs::write(root.join("src/lib.rs"), "fn a() {}\n    // TODO: refactor\n").unwrap();
        fs::write(root.join("src/nested/mod.rs"), "fn b() {}\n").unwrap();
        fs::write(root.join("src/blob.bin"), [0xffu8, 0xfe, b'T', b'O']).unwrap();
    }

    #[test]
    fn test_find_files_any_depth() {
        let (temp_dir, ops) = setup();
        seed_tree(temp_dir.path());

        let found = ops.find_files("*.rs", ".").unwrap();
        assert_eq!(found.found_files, vec!["src/lib.rs", "src/nested/mod.rs"]);
        assert_eq!(found.count, 2);

        let in_src = ops.find_files("*.md", "src").unwrap();
        assert_eq!(in_src.count, 0);
    }

    #[test]
    fn test_find_files_bad_base() {
        let (temp_dir, ops) = setup();
        seed_tree(temp_dir.path());

        assert_eq!(
            ops.find_files("*", "README.md").unwrap_err().kind(),
            ErrorKind::NotDir
        );
        assert_eq!(
            ops.find_files("*", "../").unwrap_err().kind(),
            ErrorKind::OutsideRoot
        );
    }

    #[test]
    fn test_search_in_files() {
        let (temp_dir, ops) = setup();
        seed_tree(temp_dir.path());

        let results = ops.search_in_files("TODO", "*", ".").unwrap();
        assert_eq!(results.files_with_matches, 2);
        // blob.bin is not UTF-8: counted as searched, never matched
        assert_eq!(results.files_searched, 4);
        assert!(!results.search_results.contains_key("src/blob.bin"));

        let lib = &results.search_results["src/lib.rs"];
        assert_eq!(lib.len(), 1);
        assert_eq!(lib[0].line_number, 2);
        assert_eq!(lib[0].line_content, "// TODO: refactor");

        let readme = &results.search_results["README.md"];
        assert_eq!(readme[0].line_number, 2);
    }

    #[test]
    fn test_search_splits_on_every_line_ending() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("mac.txt"), "one\rTODO two\r\nthree\nTODO four").unwrap();

        let results = ops.search_in_files("TODO", "*.txt", ".").unwrap();
        let lines: Vec<(u64, &str)> = results.search_results["mac.txt"]
            .iter()
            .map(|m| (m.line_number, m.line_content.as_str()))
            .collect();
        assert_eq!(lines, vec![(2, "TODO two"), (4, "TODO four")]);
    }

    #[test]
    fn test_universal_lines() {
        assert_eq!(universal_lines("a\r\nb\rc\n"), vec!["a", "b", "c"]);
        assert_eq!(universal_lines("a\n\nb"), vec!["a", "", "b"]);
        assert!(universal_lines("").is_empty());
    }

    #[test]
    fn test_search_respects_glob() {
        let (temp_dir, ops) = setup();
        seed_tree(temp_dir.path());

        let results = ops.search_in_files("TODO", "*.rs", ".").unwrap();
        assert_eq!(results.files_with_matches, 1);
        assert!(results.search_results.contains_key("src/lib.rs"));
    }

    #[test]
    fn test_search_no_matches() {
        let (temp_dir, ops) = setup();
        seed_tree(temp_dir.path());

        let results = ops.search_in_files("absent-needle", "*", ".").unwrap();
        assert!(results.search_results.is_empty());
        assert_eq!(results.files_with_matches, 0);
    }

    #[test]
    fn test_hash_known_digests() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("abc.txt"), "abc").unwrap();

        let sha256 = ops.calculate_hash("abc.txt", "sha256").unwrap();
        assert_eq!(
            sha256.hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let md5 = ops.calculate_hash("abc.txt", "MD5").unwrap();
        assert_eq!(md5.hash, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5.algorithm, "md5");

        let sha1 = ops.calculate_hash("abc.txt", "SHA-1").unwrap();
        assert_eq!(sha1.hash, "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_hash_spans_chunks() {
        let (temp_dir, ops) = setup();
        let data = vec![7u8; HASH_CHUNK_SIZE * 2 + 17];
        fs::write(temp_dir.path().join("big.bin"), &data).unwrap();

        let digest = ops.calculate_hash("big.bin", "sha512").unwrap();
        assert_eq!(digest.hash, hex::encode(Sha512::digest(&data)));
    }

    #[test]
    fn test_hash_errors() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("f"), "x").unwrap();

        assert_eq!(
            ops.calculate_hash("f", "crc32").unwrap_err().kind(),
            ErrorKind::InvalidAlgorithm
        );
        assert_eq!(
            ops.calculate_hash("missing", "sha256").unwrap_err().kind(),
            ErrorKind::NotFile
        );
        // Algorithm is validated before the path
        assert_eq!(
            ops.calculate_hash("missing", "crc32").unwrap_err().kind(),
            ErrorKind::InvalidAlgorithm
        );
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!(HashAlgorithm::parse("Sha_256"), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::parse("sha-384"), Some(HashAlgorithm::Sha384));
        assert_eq!(HashAlgorithm::parse("blake3"), None);
    }
}
