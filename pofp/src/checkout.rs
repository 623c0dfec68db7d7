//! Checkout stage: the final consumer of the "available objects"
//! channel (spec.md §4.7).
//!
//! Materializing working-tree files from a blob (the actual virtual-
//! filesystem "checkout") is Git working-tree semantics, which
//! spec.md's Non-goals explicitly exclude ("implementing Git
//! semantics"). This stage does the part that *is* this crate's
//! concern: proving the object the pipeline just made available is
//! actually readable from the object database before the pipeline
//! reports it as checked out.

use crate::types::Sha;

#[derive(thiserror::Error, Debug)]
pub enum CheckoutError {
    #[error(transparent)]
    Git(#[from] git2::Error),
}

pub fn checkout_one(repo: &git2::Repository, sha: Sha) -> Result<(), CheckoutError> {
    let _blob = repo.find_blob(sha.oid())?;
    Ok(())
}
