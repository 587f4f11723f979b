//! Capability-scoped filesystem access for settings files and SQLite stores.
//!
//! Every helper resolves an ambient directory handle for the parent of the
//! target path and then works relative to it, so callers never hand raw
//! `std::fs` paths around.
#![forbid(unsafe_code)]

use std::io::{self, Read};
use std::path::Component;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};

/// Read a whole UTF-8 text file.
pub fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (dir, name) = parent_dir_and_name(path)?;
    let mut file = dir.open(&name)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Whether `path` names an existing regular file.
///
/// A missing parent directory counts as "no file" rather than an error.
pub fn is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = match parent_dir_and_name(path) {
        Ok(found) => found,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match dir.metadata(&name) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Create every missing directory above `path`.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_str().is_empty() || parent == Utf8Path::new("/") {
        return Ok(());
    }
    let (root, relative) = split_root(parent)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    root.create_dir_all(&relative)
}

fn parent_dir_and_name(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("{path} does not name a file")))?
        .to_owned();
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, name))
}

/// Split a directory path into an ambient root handle and the remainder.
fn split_root(dir: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let (root, relative) = match dir.as_std_path().components().next() {
        Some(Component::Prefix(prefix)) => {
            let prefix = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;
            let root = Utf8PathBuf::from(prefix).join(std::path::MAIN_SEPARATOR.to_string());
            let relative = dir
                .strip_prefix(&root)
                .or_else(|_| dir.strip_prefix(prefix))
                .map_err(|_| io::Error::other(format!("cannot strip {prefix} from {dir}")))?
                .to_path_buf();
            (root, relative)
        }
        Some(Component::RootDir) => {
            let root = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = dir
                .strip_prefix(&root)
                .map_err(|_| io::Error::other(format!("cannot strip root from {dir}")))?
                .to_path_buf();
            (root, relative)
        }
        _ => (Utf8PathBuf::from("."), dir.to_path_buf()),
    };
    let handle = fs_utf8::Dir::open_ambient_dir(&root, ambient_authority())?;
    Ok((handle, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        tempfile::tempdir().expect("create temp dir")
    }

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("temp dir is UTF-8")
    }

    #[rstest]
    fn reads_written_file(temp_dir: TempDir) {
        let path = utf8(&temp_dir).join("settings.json");
        std::fs::write(&path, "{\"optimizer\":{}}").expect("write fixture");
        assert_eq!(
            read_to_string(&path).expect("read file"),
            "{\"optimizer\":{}}"
        );
    }

    #[rstest]
    fn missing_files_are_not_files(temp_dir: TempDir) {
        let base = utf8(&temp_dir);
        assert!(!is_file(&base.join("absent.json")).expect("probe file"));
        assert!(!is_file(&base.join("no/such/dir/absent.json")).expect("probe nested"));
        assert!(!is_file(&base).expect("directories are not files"));
    }

    #[rstest]
    fn creates_nested_parents(temp_dir: TempDir) {
        let path = utf8(&temp_dir).join("a/b/c/store.db");
        ensure_parent_dir(&path).expect("create parents");
        assert!(utf8(&temp_dir).join("a/b/c").is_dir());
        ensure_parent_dir(&path).expect("second call is a no-op");
    }

    #[rstest]
    #[case("store.db")]
    #[case("/")]
    fn bare_names_need_no_parent(#[case] path: &str) {
        ensure_parent_dir(Utf8Path::new(path)).expect("nothing to create");
    }
}
