//! Atomic loose-object writes (spec.md §4.6 invariant: "never poison the
//! store" with a partial download).

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::types::Sha;

fn loose_object_path(root: &Path, sha: Sha) -> (PathBuf, String) {
    let hex = sha.to_string();
    let dir = root.join(&hex[0..2]);
    let file = hex[2..].to_string();
    (dir, file)
}

/// Write `body` to the loose-object store under `sha`, atomically:
/// the bytes land in a temp file in the same directory, then get
/// renamed into place, so a reader never observes a partial object.
pub fn write_loose_object_atomic(root: &Path, sha: Sha, mut body: impl Read) -> io::Result<()> {
    let (dir, file_name) = loose_object_path(root, sha);
    std::fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    io::copy(&mut body, tmp.as_file_mut())?;
    tmp.persist(dir.join(file_name))
        .map_err(|e| e.error)?;
    Ok(())
}

pub fn loose_object_exists(root: &Path, sha: Sha) -> bool {
    let (dir, file_name) = loose_object_path(root, sha);
    dir.join(file_name).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_then_exists() {
        let dir = tempfile::tempdir().unwrap();
        let sha = Sha::parse("d00491fd7e5bb6fa28c517a0bb32b8b506539d4d").unwrap();
        write_loose_object_atomic(dir.path(), sha, Cursor::new(b"hello".to_vec())).unwrap();
        assert!(loose_object_exists(dir.path(), sha));
    }
}
