//! Pack indexing stage: hands a fetched temp pack to `git2`'s own
//! indexer (which writes the finalized, indexed pack into the
//! repository's object store) and reports the objects it contained as
//! available (spec.md §4.7).

use std::fs::File;
use std::io;

use crate::types::{IndexPackRequest, Sha};

#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Stream `request.temp_pack_path` into the repository's object
/// database via `git2`'s pack writer, which indexes and finalizes the
/// pack into the canonical pack directory, then return the SHAs the
/// originating [`crate::types::BlobDownloadRequest`] asked for (now
/// retrievable from the odb).
///
/// The fetcher relinquished ownership of the temp pack file on channel
/// transfer (spec.md §3); this function removes it once its bytes have
/// been absorbed into the odb.
pub fn index_one(repo: &git2::Repository, request: &IndexPackRequest) -> Result<Vec<Sha>, IndexError> {
    let odb = repo.odb()?;
    let mut writer = odb.writepack(None)?;
    let mut file = File::open(&request.temp_pack_path)?;
    io::copy(&mut file, &mut writer)?;
    writer.commit()?;
    drop(writer);

    let _ = std::fs::remove_file(&request.temp_pack_path);

    Ok(request.request.shas().to_vec())
}
