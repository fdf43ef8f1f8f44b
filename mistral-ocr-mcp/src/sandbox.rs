//! Filesystem guard for the OCR tools.
//!
//! Input documents may live anywhere readable, but every file this server
//! writes must land inside the configured allowed directory. The guard works on
//! canonical paths, so `..` segments and symlinks are resolved before the
//! containment check is made.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{MistralOcrError, Result};

/// File extensions accepted as OCR input, lowercase and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "webp", "gif"];

#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
    configured: PathBuf,
}

impl PathSandbox {
    pub fn new(allowed_dir: impl AsRef<Path>) -> Result<Self> {
        let configured = allowed_dir.as_ref().to_path_buf();

        if !configured.is_absolute() {
            return Err(MistralOcrError::Configuration(format!(
                "MISTRAL_OCR_ALLOWED_DIR must be an absolute path: {}",
                configured.display()
            )));
        }

        let root = fs::canonicalize(&configured).map_err(|e| {
            MistralOcrError::Configuration(format!(
                "MISTRAL_OCR_ALLOWED_DIR is not accessible: {}: {e}",
                configured.display()
            ))
        })?;

        if !root.is_dir() {
            return Err(MistralOcrError::Configuration(format!(
                "MISTRAL_OCR_ALLOWED_DIR is not a directory: {}",
                configured.display()
            )));
        }

        Ok(Self { root, configured })
    }

    /// Canonical form of the allowed directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Resolves `candidate` to a canonical, writable directory inside the
    /// allowed root, creating missing components only once the resolved
    /// location is known to be inside it.
    pub fn guard_output_dir(&self, candidate: impl AsRef<Path>) -> Result<PathBuf> {
        let candidate = candidate.as_ref();

        if !candidate.is_absolute() {
            return Err(MistralOcrError::InvalidPath(format!(
                "output_dir must be an absolute path: {}",
                candidate.display()
            )));
        }

        let (existing, tail) = split_existing_ancestor(candidate)?;
        let mut resolved = fs::canonicalize(&existing).map_err(|e| {
            MistralOcrError::InvalidPath(format!(
                "Invalid output_dir: {} - {e}",
                candidate.display()
            ))
        })?;
        resolved.extend(&tail);

        if !self.contains(&resolved) {
            return Err(self.escape_error(candidate));
        }

        if !tail.is_empty() {
            fs::create_dir_all(&resolved).map_err(|e| {
                MistralOcrError::InvalidPath(format!(
                    "Failed to create output_dir {}: {e}",
                    candidate.display()
                ))
            })?;
            debug!(path = %resolved.display(), "Created output directory");
        }

        // Re-check after creation in case a component was swapped underneath us.
        let canonical = fs::canonicalize(&resolved)?;
        if !self.contains(&canonical) {
            return Err(self.escape_error(candidate));
        }

        if !canonical.is_dir() {
            return Err(MistralOcrError::InvalidPath(format!(
                "output_dir is not a directory: {}",
                candidate.display()
            )));
        }

        ensure_writable(&canonical, candidate)?;

        Ok(canonical)
    }

    fn escape_error(&self, candidate: &Path) -> MistralOcrError {
        MistralOcrError::PermissionDenied(format!(
            "output_dir {} must be within the allowed directory: {}",
            candidate.display(),
            self.configured.display()
        ))
    }
}

/// Validates an input document path: absolute, existing, a regular file, and
/// one of the supported types. Returns the canonical path.
pub fn validate_document_path(file_path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = file_path.as_ref();

    if !path.is_absolute() {
        return Err(MistralOcrError::InvalidPath(format!(
            "file_path must be an absolute path: {}",
            path.display()
        )));
    }

    let resolved = fs::canonicalize(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            MistralOcrError::InvalidPath(format!("file_path does not exist: {}", path.display()))
        }
        _ => MistralOcrError::InvalidPath(format!("Invalid file_path: {} - {e}", path.display())),
    })?;

    if !resolved.is_file() {
        return Err(MistralOcrError::InvalidPath(format!(
            "file_path is not a regular file: {}",
            path.display()
        )));
    }

    let supported = resolved
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()));

    if !supported {
        return Err(MistralOcrError::UnsupportedDocument(format!(
            "Unsupported file type. Supported types: {}",
            SUPPORTED_EXTENSIONS
                .iter()
                .map(|ext| format!(".{ext}"))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    Ok(resolved)
}

/// Splits `path` into its longest existing ancestor and the missing tail.
/// The tail may only hold plain names.
fn split_existing_ancestor(path: &Path) -> Result<(PathBuf, Vec<OsString>)> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();

    loop {
        match fs::symlink_metadata(&existing) {
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(Component::Normal(name)) = existing.components().next_back() else {
                    return Err(MistralOcrError::InvalidPath(format!(
                        "output_dir has unresolvable components: {}",
                        path.display()
                    )));
                };
                tail.push(name.to_os_string());

                if !existing.pop() {
                    return Err(MistralOcrError::InvalidPath(format!(
                        "output_dir has no existing ancestor: {}",
                        path.display()
                    )));
                }
            }
            Err(e) => {
                return Err(MistralOcrError::InvalidPath(format!(
                    "Invalid output_dir: {} - {e}",
                    path.display()
                )));
            }
        }
    }

    tail.reverse();
    Ok((existing, tail))
}

fn ensure_writable(dir: &Path, candidate: &Path) -> Result<()> {
    tempfile::Builder::new()
        .prefix(".write-test-")
        .tempfile_in(dir)
        .map(drop)
        .map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => MistralOcrError::PermissionDenied(format!(
                "output_dir is not writable: {}",
                candidate.display()
            )),
            _ => MistralOcrError::InvalidPath(format!(
                "Failed to check writability of {}: {e}",
                candidate.display()
            )),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, PathSandbox) {
        let dir = TempDir::new().unwrap();
        let sandbox = PathSandbox::new(dir.path()).unwrap();
        (dir, sandbox)
    }

    fn entry_count(path: &Path) -> usize {
        fs::read_dir(path).unwrap().count()
    }

    #[test]
    fn test_relative_allowed_dir_is_configuration_error() {
        let result = PathSandbox::new("relative/out");
        assert!(matches!(result, Err(MistralOcrError::Configuration(_))));
    }

    #[test]
    fn test_missing_allowed_dir_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let result = PathSandbox::new(dir.path().join("missing"));
        assert!(matches!(result, Err(MistralOcrError::Configuration(_))));
    }

    #[test]
    fn test_root_itself_is_accepted() {
        let (_dir, sandbox) = sandbox();
        let guarded = sandbox.guard_output_dir(sandbox.root()).unwrap();
        assert_eq!(guarded, sandbox.root());
    }

    #[test]
    fn test_missing_subdirectory_is_created() {
        let (_dir, sandbox) = sandbox();
        let target = sandbox.root().join("sub").join("nested");

        let guarded = sandbox.guard_output_dir(&target).unwrap();

        assert_eq!(guarded, target);
        assert!(target.is_dir());
    }

    #[test]
    fn test_parent_dir_escape_is_rejected() {
        let (_dir, sandbox) = sandbox();
        let escape = sandbox.root().join("..").join("elsewhere");

        let result = sandbox.guard_output_dir(&escape);

        assert!(matches!(result, Err(MistralOcrError::PermissionDenied(_))));
        assert!(!sandbox.root().parent().unwrap().join("elsewhere").exists());
    }

    #[test]
    fn test_parent_dir_in_missing_tail_is_rejected() {
        let (_dir, sandbox) = sandbox();
        let sneaky = sandbox.root().join("ghost").join("..").join("..").join("x");

        let result = sandbox.guard_output_dir(&sneaky);

        assert!(result.is_err());
        assert_eq!(entry_count(sandbox.root()), 0);
    }

    #[test]
    fn test_outside_directory_is_rejected() {
        let (_dir, sandbox) = sandbox();
        let outside = TempDir::new().unwrap();

        let result = sandbox.guard_output_dir(outside.path().join("sub"));

        assert!(matches!(result, Err(MistralOcrError::PermissionDenied(_))));
        assert!(!outside.path().join("sub").exists());
    }

    #[test]
    fn test_relative_output_dir_is_rejected() {
        let (_dir, sandbox) = sandbox();
        let result = sandbox.guard_output_dir("out/images");
        assert!(matches!(result, Err(MistralOcrError::InvalidPath(_))));
    }

    #[test]
    fn test_file_as_output_dir_is_rejected() {
        let (_dir, sandbox) = sandbox();
        let file = sandbox.root().join("notes.txt");
        fs::write(&file, "hello").unwrap();

        let result = sandbox.guard_output_dir(&file);
        assert!(matches!(result, Err(MistralOcrError::InvalidPath(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let (_dir, sandbox) = sandbox();
        let outside = TempDir::new().unwrap();
        let link = sandbox.root().join("link");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let direct = sandbox.guard_output_dir(&link);
        let nested = sandbox.guard_output_dir(link.join("sub"));

        assert!(matches!(direct, Err(MistralOcrError::PermissionDenied(_))));
        assert!(matches!(nested, Err(MistralOcrError::PermissionDenied(_))));
        assert_eq!(entry_count(outside.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_is_followed() {
        let (_dir, sandbox) = sandbox();
        let real = sandbox.root().join("real");
        fs::create_dir(&real).unwrap();
        let link = sandbox.root().join("alias");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let guarded = sandbox.guard_output_dir(&link).unwrap();
        assert_eq!(guarded, real);
    }

    #[test]
    fn test_document_path_validation() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("invoice.PDF");
        fs::write(&pdf, b"%PDF-1.7").unwrap();
        let text = dir.path().join("notes.txt");
        fs::write(&text, b"plain").unwrap();

        assert!(validate_document_path(&pdf).is_ok());
        assert!(matches!(
            validate_document_path(&text),
            Err(MistralOcrError::UnsupportedDocument(_))
        ));
        assert!(matches!(
            validate_document_path(dir.path().join("missing.pdf")),
            Err(MistralOcrError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_document_path("invoice.pdf"),
            Err(MistralOcrError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_document_path(dir.path()),
            Err(MistralOcrError::InvalidPath(_))
        ));
    }
}
