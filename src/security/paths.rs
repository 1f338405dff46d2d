use crate::error::{CrewError, Result};
use std::path::{Component, Path, PathBuf};

/// Extensions deliverable files may use.
pub const ALLOWED_EXTENSIONS: &[&str] = &["txt", "json", "md", "csv", "log"];

/// Hard cap on any deliverable file.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Cap on text deliverable content written by the debrief path.
pub const MAX_TEXT_CONTENT: usize = 100 * 1024;

fn file_name_is_safe(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !name.starts_with('.')
}

/// Resolves a deliverable file path under
/// `<data_root>/deliverables/<workflow_dir>/<file_name>`.
///
/// Rejects traversal (`..`, absolute paths, separators in the file name),
/// non-whitelisted extensions, and, when the parent directory already
/// exists, any canonical form escaping the data root (covers symlinks
/// pointing outside).
///
/// # Errors
/// Returns `CrewError::InvalidArgument` on any rejected path.
pub fn resolve_deliverable_path(
    deliverables_root: &Path,
    workflow_dir: &str,
    file_name: &str,
) -> Result<PathBuf> {
    if !file_name_is_safe(file_name) {
        return Err(CrewError::InvalidArgument(format!(
            "unsafe deliverable file name: {file_name}"
        )));
    }
    if !file_name_is_safe(workflow_dir) {
        return Err(CrewError::InvalidArgument(format!(
            "unsafe deliverable directory: {workflow_dir}"
        )));
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match extension.as_deref() {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext) => {}
        other => {
            return Err(CrewError::InvalidArgument(format!(
                "deliverable extension not allowed: {}",
                other.unwrap_or("<none>")
            )))
        }
    }

    let candidate = deliverables_root.join(workflow_dir).join(file_name);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(CrewError::InvalidArgument(
            "path traversal rejected".to_string(),
        ));
    }

    // Canonicalize whatever prefix exists so a symlinked workflow
    // directory cannot escape the root.
    if let Ok(canonical_root) = deliverables_root.canonicalize() {
        if let Ok(canonical_parent) = candidate
            .parent()
            .unwrap_or(deliverables_root)
            .canonicalize()
        {
            if !canonical_parent.starts_with(&canonical_root) {
                return Err(CrewError::InvalidArgument(
                    "deliverable path escapes data root".to_string(),
                ));
            }
        }
    }

    Ok(candidate)
}

/// Writes one text deliverable through the path jail, enforcing content
/// caps and creating the per-workflow directory on demand.
///
/// # Errors
/// Returns `CrewError::InvalidArgument` on rejected paths or oversized
/// content, `CrewError::Io` on filesystem failures.
pub async fn write_text_deliverable(
    deliverables_root: &Path,
    workflow_dir: &str,
    file_name: &str,
    content: &str,
) -> Result<PathBuf> {
    if content.len() > MAX_TEXT_CONTENT {
        return Err(CrewError::InvalidArgument(format!(
            "deliverable content exceeds {MAX_TEXT_CONTENT} bytes"
        )));
    }
    let path = resolve_deliverable_path(deliverables_root, workflow_dir, file_name)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, content.as_bytes()).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{resolve_deliverable_path, write_text_deliverable, MAX_TEXT_CONTENT};
    use std::path::Path;

    #[test]
    fn traversal_names_are_rejected() {
        let root = Path::new("/data/deliverables");
        assert!(resolve_deliverable_path(root, "wf-1", "../escape.txt").is_err());
        assert!(resolve_deliverable_path(root, "../wf-1", "ok.txt").is_err());
        assert!(resolve_deliverable_path(root, "wf-1", "/etc/passwd").is_err());
        assert!(resolve_deliverable_path(root, "wf-1", "a/b.txt").is_err());
    }

    #[test]
    fn extension_whitelist_is_enforced() {
        let root = Path::new("/data/deliverables");
        assert!(resolve_deliverable_path(root, "wf-1", "out.txt").is_ok());
        assert!(resolve_deliverable_path(root, "wf-1", "out.json").is_ok());
        assert!(resolve_deliverable_path(root, "wf-1", "out.sh").is_err());
        assert!(resolve_deliverable_path(root, "wf-1", "out").is_err());
        assert!(resolve_deliverable_path(root, "wf-1", ".hidden.txt").is_err());
    }

    #[tokio::test]
    async fn write_respects_content_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let big = "x".repeat(MAX_TEXT_CONTENT + 1);
        assert!(
            write_text_deliverable(dir.path(), "wf-1", "big.txt", &big)
                .await
                .is_err()
        );

        let path = write_text_deliverable(dir.path(), "wf-1", "ok.txt", "hello")
            .await
            .expect("write");
        let read = tokio::fs::read_to_string(path).await.expect("read");
        assert_eq!(read, "hello");
    }

    #[tokio::test]
    async fn symlinked_directory_cannot_escape_root() {
        let outside = tempfile::tempdir().expect("outside");
        let root = tempfile::tempdir().expect("root");
        let link = root.path().join("wf-link");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outside.path(), &link).expect("symlink");
            let result = resolve_deliverable_path(root.path(), "wf-link", "out.txt");
            assert!(result.is_err());
        }
    }
}
