//! Per-page history of fetched wiki revisions, kept for replaying extraction.
//!
//! Each page gets a directory named by its id. Every distinct revision is one
//! immutable `<sha256>.json` snapshot of the page, and `HEAD` names the
//! revision seen most recently.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::fs;
use vtwiki_core::{PageId, WikiPage};

const HEAD: &str = "HEAD";
const SNAPSHOT_EXT: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedRevision {
    pub page_id: PageId,
    pub revision: String,
    pub path: PathBuf,
    /// False when this exact revision was already archived.
    pub first_seen: bool,
}

#[derive(Debug, Clone)]
pub struct PageArchive {
    root: PathBuf,
}

impl PageArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn page_dir(&self, id: PageId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn snapshot_path(&self, id: PageId, revision: &str) -> PathBuf {
        self.page_dir(id).join(format!("{revision}.{SNAPSHOT_EXT}"))
    }

    /// Records `page` as its latest revision. A title or content change is a
    /// new revision; refetching an unchanged page only moves `HEAD`.
    pub async fn store(&self, page: &WikiPage) -> anyhow::Result<ArchivedRevision> {
        let snapshot = serde_json::to_vec_pretty(page)
            .with_context(|| format!("encoding page {}", page.id))?;
        let revision = hex::encode(Sha256::digest(&snapshot));
        let dir = self.page_dir(page.id);
        let path = self.snapshot_path(page.id, &revision);

        let first_seen = {
            let (dir, path) = (dir.clone(), path.clone());
            tokio::task::spawn_blocking(move || write_once(&dir, &path, &snapshot))
                .await
                .context("archive writer stopped")??
        };
        fs::write(dir.join(HEAD), &revision)
            .await
            .with_context(|| format!("moving HEAD of page {}", page.id))?;

        Ok(ArchivedRevision {
            page_id: page.id,
            revision,
            path,
            first_seen,
        })
    }

    pub async fn load(&self, id: PageId, revision: &str) -> anyhow::Result<Option<WikiPage>> {
        let path = self.snapshot_path(id, revision);
        let Some(bytes) = read_if_present(&path).await? else {
            return Ok(None);
        };
        let page = serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding {}", path.display()))?;
        Ok(Some(page))
    }

    pub async fn latest(&self, id: PageId) -> anyhow::Result<Option<WikiPage>> {
        let Some(head) = read_if_present(&self.page_dir(id).join(HEAD)).await? else {
            return Ok(None);
        };
        let revision = String::from_utf8_lossy(&head).trim().to_string();
        let page = self.load(id, &revision).await?;
        Ok(page)
    }

    /// Every archived revision of `id`, sorted by hash.
    pub async fn revisions(&self, id: PageId) -> anyhow::Result<Vec<String>> {
        let dir = self.page_dir(id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("listing {}", dir.display())),
        };
        let mut revisions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                revisions.push(stem.to_string());
            }
        }
        revisions.sort();
        Ok(revisions)
    }
}

async fn read_if_present(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

/// Returns whether `path` was created by this call. Snapshots are staged in
/// the page directory so the final link never exposes a partial file.
fn write_once(dir: &Path, path: &Path, snapshot: &[u8]) -> anyhow::Result<bool> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    if path.exists() {
        return Ok(false);
    }
    let mut staged =
        NamedTempFile::new_in(dir).with_context(|| format!("staging in {}", dir.display()))?;
    staged
        .write_all(snapshot)
        .with_context(|| format!("writing {}", staged.path().display()))?;
    match staged.persist_noclobber(path) {
        Ok(_) => Ok(true),
        // Lost a race with another worker archiving the same revision.
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.error).with_context(|| format!("persisting {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn page(title: &str, content: &str) -> WikiPage {
        WikiPage {
            id: 1234,
            title: title.into(),
            raw_content: content.into(),
        }
    }

    #[tokio::test]
    async fn head_follows_edits_and_reverts() {
        let dir = tempdir().unwrap();
        let archive = PageArchive::new(dir.path());
        let original = page("Sample", "{{Infobox VTuber|debut=2021}}");
        let edited = page("Sample", "{{Infobox VTuber|debut=2020}}");

        let first = archive.store(&original).await.unwrap();
        assert!(first.first_seen);
        assert_eq!(archive.latest(1234).await.unwrap(), Some(original.clone()));

        let second = archive.store(&edited).await.unwrap();
        assert!(second.first_seen);
        assert_eq!(archive.latest(1234).await.unwrap(), Some(edited.clone()));

        let reverted = archive.store(&original).await.unwrap();
        assert!(!reverted.first_seen);
        assert_eq!(reverted.path, first.path);
        assert_eq!(archive.latest(1234).await.unwrap(), Some(original));

        let mut expected = vec![first.revision, second.revision.clone()];
        expected.sort();
        assert_eq!(archive.revisions(1234).await.unwrap(), expected);
        assert_eq!(
            archive.load(1234, &second.revision).await.unwrap(),
            Some(edited)
        );
    }

    #[tokio::test]
    async fn renamed_page_is_a_new_revision() {
        let dir = tempdir().unwrap();
        let archive = PageArchive::new(dir.path());

        let before = archive.store(&page("Sample", "{{Infobox VTuber}}")).await.unwrap();
        let after = archive
            .store(&page("Sample (VTuber)", "{{Infobox VTuber}}"))
            .await
            .unwrap();

        assert!(after.first_seen);
        assert_ne!(before.revision, after.revision);
        assert_eq!(
            archive.latest(1234).await.unwrap().map(|p| p.title),
            Some("Sample (VTuber)".to_string())
        );
    }

    #[tokio::test]
    async fn unarchived_page_has_no_history() {
        let dir = tempdir().unwrap();
        let archive = PageArchive::new(dir.path());

        assert_eq!(archive.latest(99).await.unwrap(), None);
        assert!(archive.revisions(99).await.unwrap().is_empty());
        assert_eq!(archive.load(99, "deadbeef").await.unwrap(), None);
    }
}
