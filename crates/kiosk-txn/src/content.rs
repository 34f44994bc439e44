use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

/// Directory that holds the installed content of `product_id`.
///
/// Fails for ids that are not a single plain path component.
pub fn content_dir(contents_root: &Path, product_id: &str) -> io::Result<PathBuf> {
    let mut components = Path::new(product_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(contents_root.join(product_id)),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("product id {product_id:?} is not a valid directory name"),
        )),
    }
}

/// Move downloaded content into `contents_root/<product_id>/`, replacing
/// whatever was installed there before.
pub fn install_content(contents_root: &Path, product_id: &str, source: &Path) -> io::Result<PathBuf> {
    let target = content_dir(contents_root, product_id)?;
    if !source.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("downloaded content missing at {}", source.display()),
        ));
    }

    fs::create_dir_all(contents_root)?;
    if target.is_dir() {
        fs::remove_dir_all(&target)?;
    } else if target.exists() {
        fs::remove_file(&target)?;
    }

    if fs::rename(source, &target).is_err() {
        // Source on another filesystem: copy, then remove the original.
        copy_recursive(source, &target)?;
        if source.is_dir() {
            fs::remove_dir_all(source)?;
        } else {
            fs::remove_file(source)?;
        }
    }

    debug!(product_id, path = %target.display(), "content installed");
    Ok(target)
}

fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    if from.is_dir() {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else {
        fs::copy(from, to)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_dir_is_deterministic() {
        let root = Path::new("/data/Contents");
        assert_eq!(
            content_dir(root, "pack.levels").unwrap(),
            PathBuf::from("/data/Contents/pack.levels")
        );
    }

    #[test]
    fn content_dir_rejects_path_tricks() {
        let root = Path::new("/data/Contents");
        for bad in ["", "..", "a/b", "/abs", "."] {
            assert!(content_dir(root, bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn installs_directory_and_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Contents");

        let first = dir.path().join("dl1");
        fs::create_dir_all(first.join("levels")).unwrap();
        fs::write(first.join("levels/1.dat"), b"one").unwrap();
        let installed = install_content(&root, "pack.levels", &first).unwrap();
        assert_eq!(installed, root.join("pack.levels"));
        assert!(installed.join("levels/1.dat").exists());
        assert!(!first.exists());

        let second = dir.path().join("dl2");
        fs::create_dir_all(&second).unwrap();
        fs::write(second.join("2.dat"), b"two").unwrap();
        install_content(&root, "pack.levels", &second).unwrap();
        assert!(installed.join("2.dat").exists());
        assert!(!installed.join("levels").exists());
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = install_content(dir.path(), "pack", &dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn copy_recursive_copies_tree() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        fs::create_dir_all(from.join("a")).unwrap();
        fs::write(from.join("a/b.txt"), b"b").unwrap();
        let to = dir.path().join("to");
        copy_recursive(&from, &to).unwrap();
        assert_eq!(fs::read(to.join("a/b.txt")).unwrap(), b"b");
    }
}
