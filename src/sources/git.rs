//! Git checkouts pinned to a commit or tag.

use std::path::Path;

use anyhow::{Context, Result};
use git2::{build::CheckoutBuilder, Oid, Repository};
use url::Url;

use crate::core::VersionPin;
use crate::util::fs::ensure_dir;

/// Clones a repository and checks out the pinned revision.
#[derive(Debug, Clone)]
pub struct GitFetcher<'a> {
    url: &'a str,
    pin: Option<&'a VersionPin>,
}

impl<'a> GitFetcher<'a> {
    pub fn new(url: &'a str, pin: Option<&'a VersionPin>) -> Self {
        GitFetcher { url, pin }
    }

    /// Clone into `dest` and detach HEAD at the pin.
    pub fn fetch_into(&self, dest: &Path) -> Result<()> {
        // Local repositories are cloned by path.
        if !Path::new(self.url).is_absolute() {
            Url::parse(self.url).with_context(|| format!("invalid git url `{}`", self.url))?;
        }
        let remote = self.url;

        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }

        tracing::info!("Cloning {}", remote);
        let repo = Repository::clone(remote, dest)
            .with_context(|| format!("failed to clone {}", remote))?;

        if let Some(pin) = self.pin {
            checkout(&repo, pin)?;
        }
        Ok(())
    }
}

fn checkout(repo: &Repository, pin: &VersionPin) -> Result<()> {
    let commit = match pin {
        VersionPin::Commit(rev) => {
            let oid = Oid::from_str(rev).with_context(|| format!("invalid commit `{}`", rev))?;
            repo.find_commit(oid)
                .with_context(|| format!("commit {} not found", rev))?
        }
        VersionPin::Tag(tag) => repo
            .find_reference(&format!("refs/tags/{}", tag))
            .and_then(|r| r.peel_to_commit())
            .with_context(|| format!("tag `{}` not found", tag))?,
    };

    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
    repo.set_head_detached(commit.id())?;
    tracing::debug!("checked out {}", pin);
    Ok(())
}
