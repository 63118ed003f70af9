use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{LabexecError, Result};
use crate::protocol::VirtualFile;

/// Resolve a virtual file name to a path relative to the session directory.
///
/// Absolute names and `..` segments are rejected; `.` segments are dropped.
pub fn contained_path(name: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();

    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(LabexecError::PathEscape {
                    name: name.to_string(),
                });
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(LabexecError::FileWrite {
            name: name.to_string(),
            message: "name does not refer to a file".to_string(),
        });
    }

    Ok(relative)
}

/// Write every `file`-typed entry into `root`, replacing existing content.
///
/// All names are validated before anything is written, so a request with an
/// escaping name leaves the directory untouched. Returns the number of files
/// written.
pub async fn materialize(root: &Path, files: &[VirtualFile]) -> Result<usize> {
    let planned = files
        .iter()
        .filter(|f| f.is_file())
        .map(|f| contained_path(&f.name).map(|rel| (f, rel)))
        .collect::<Result<Vec<_>>>()?;

    for (file, relative) in &planned {
        prepare_parents(root, relative, &file.name).await?;

        let path = root.join(relative);
        match fs::symlink_metadata(&path).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(LabexecError::PathEscape {
                    name: file.name.clone(),
                });
            }
            Ok(meta) if meta.is_dir() => {
                return Err(write_error(&file.name, "a directory exists at this path"));
            }
            _ => {}
        }

        fs::write(&path, file.content.as_bytes())
            .await
            .map_err(|e| write_error(&file.name, e))?;

        debug!(
            name = %file.name,
            bytes = file.content.len(),
            "Materialized file"
        );
    }

    Ok(planned.len())
}

/// Create the intermediate directories of `relative` one level at a time,
/// refusing to traverse symlinks.
async fn prepare_parents(root: &Path, relative: &Path, name: &str) -> Result<()> {
    let Some(parent) = relative.parent() else {
        return Ok(());
    };

    let mut current = root.to_path_buf();
    for part in parent.components() {
        current.push(part);
        match fs::symlink_metadata(&current).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(LabexecError::PathEscape {
                    name: name.to_string(),
                });
            }
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(write_error(
                    name,
                    format!("{} is not a directory", current.display()),
                ));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => match fs::create_dir(&current).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(write_error(name, e)),
            },
            Err(e) => return Err(write_error(name, e)),
        }
    }

    Ok(())
}

fn write_error(name: &str, message: impl ToString) -> LabexecError {
    LabexecError::FileWrite {
        name: name.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EntryType;

    #[test]
    fn test_contained_path() {
        assert_eq!(contained_path("main.c").unwrap(), PathBuf::from("main.c"));
        assert_eq!(
            contained_path("./src/./lib.rs").unwrap(),
            PathBuf::from("src/lib.rs")
        );
        assert!(matches!(
            contained_path("../../etc/passwd"),
            Err(LabexecError::PathEscape { .. })
        ));
        assert!(matches!(
            contained_path("src/../../x"),
            Err(LabexecError::PathEscape { .. })
        ));
        assert!(matches!(
            contained_path("/etc/passwd"),
            Err(LabexecError::PathEscape { .. })
        ));
        assert!(matches!(
            contained_path(""),
            Err(LabexecError::FileWrite { .. })
        ));
        assert!(matches!(
            contained_path("."),
            Err(LabexecError::FileWrite { .. })
        ));
    }

    #[tokio::test]
    async fn test_writes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            VirtualFile::file("main.py", "print(1)"),
            VirtualFile::file("pkg/util/helpers.py", "X = 1"),
        ];

        assert_eq!(materialize(dir.path(), &files).await.unwrap(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("pkg/util/helpers.py")).unwrap(),
            "X = 1"
        );
    }

    #[tokio::test]
    async fn test_overwrites_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        materialize(dir.path(), &[VirtualFile::file("a.txt", "a much longer first version")])
            .await
            .unwrap();
        materialize(dir.path(), &[VirtualFile::file("a.txt", "v2")])
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "v2"
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_skips_non_file_entries() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            VirtualFile {
                name: "src".to_string(),
                content: String::new(),
                kind: EntryType::Folder,
            },
            VirtualFile::file("b.txt", ""),
        ];

        assert_eq!(materialize(dir.path(), &files).await.unwrap(), 1);
        assert!(!dir.path().join("src").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.txt")).unwrap(),
            ""
        );
    }

    #[tokio::test]
    async fn test_escape_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("session");
        std::fs::create_dir(&root).unwrap();

        let files = vec![
            VirtualFile::file("ok.txt", "fine"),
            VirtualFile::file("../outside.txt", "bad"),
        ];
        let err = materialize(&root, &files).await.unwrap_err();

        assert!(matches!(err, LabexecError::PathEscape { ref name } if name == "../outside.txt"));
        assert!(!root.join("ok.txt").exists());
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[tokio::test]
    async fn test_directory_in_the_way_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a.txt")).unwrap();

        let err = materialize(dir.path(), &[VirtualFile::file("a.txt", "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, LabexecError::FileWrite { ref name, .. } if name == "a.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_refuses_to_follow_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("session");
        let outside = dir.path().join("outside");
        std::fs::create_dir(&root).unwrap();
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();
        std::os::unix::fs::symlink(outside.join("t.txt"), root.join("t.txt")).unwrap();

        let err = materialize(&root, &[VirtualFile::file("link/x.txt", "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, LabexecError::PathEscape { .. }));

        let err = materialize(&root, &[VirtualFile::file("t.txt", "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, LabexecError::PathEscape { .. }));

        assert_eq!(std::fs::read_dir(&outside).unwrap().count(), 0);
    }
}
