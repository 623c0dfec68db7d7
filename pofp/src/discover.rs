//! The "diff-helper → FindMissingBlobs" producer named in spec.md §4.7's
//! data flow: walks a commit's tree and streams the blob SHAs that are
//! not yet present in the local object database.
//!
//! Full tree-vs-tree diffing (the actual "diff-helper" a real checkout
//! would use to scope a sparse/partial clone) is outside this crate's
//! concerns — spec.md's Non-goals exclude implementing Git semantics.
//! This performs the minimal walk needed to produce a missing-blob
//! stream for the downstream pipeline stages.

use crossbeam_channel::Sender;

use crate::types::Sha;

#[derive(thiserror::Error, Debug)]
pub enum DiscoverError {
    #[error(transparent)]
    Git(#[from] git2::Error),
}

/// Walk `commit`'s tree and send every blob SHA not already present in
/// the repository's object database to `output`.
pub fn find_missing_blobs(
    repo: &git2::Repository,
    commit: git2::Oid,
    output: Sender<Sha>,
) -> Result<(), DiscoverError> {
    let commit = repo.find_commit(commit)?;
    let tree = commit.tree()?;
    let odb = repo.odb()?;

    tree.walk(git2::TreeWalkMode::PreOrder, |_root, entry| {
        if entry.kind() == Some(git2::ObjectType::Blob) {
            let oid = entry.id();
            if !odb.exists(oid) {
                // A closed receiver means the pipeline is shutting
                // down; stop the walk rather than erroring.
                if output.send(Sha::from_oid(oid)).is_err() {
                    return -1; // receiver gone; abort the walk
                }
            }
        }
        0
    })?;

    Ok(())
}
