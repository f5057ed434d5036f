//! Rendered board images and the manifest index that finds them again.
//!
//! Each analysis writes into its own `<root>/<request-id>/` directory, so
//! concurrent requests never touch the same files. The directory's
//! `manifest.json` records which image belongs to which candidate; lookups
//! never depend on directory naming. Only the newest manifests stay in
//! memory, older ones are read back from disk when requested.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::VisionError;

const MANIFEST: &str = "manifest.json";

/// Images rendered for one candidate move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveArtifacts {
    /// 1-based rank of the candidate in the engine's list.
    pub move_id: u32,
    pub move_uci: String,
    pub board_image: String,
    /// One image per principal-variation step, in playing order.
    pub sequence_images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisManifest {
    pub request_id: Uuid,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub moves: Vec<MoveArtifacts>,
}

impl AnalysisManifest {
    pub fn new(request_id: Uuid) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            request_id,
            created_at,
            moves: Vec::new(),
        }
    }

    pub fn find(&self, move_id: u32) -> Option<&MoveArtifacts> {
        self.moves.iter().find(|m| m.move_id == move_id)
    }
}

/// Manifests kept in memory unless configured otherwise.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

struct Index {
    manifests: HashMap<Uuid, AnalysisManifest>,
    latest: Option<(u64, Uuid)>,
    capacity: usize,
}

impl Index {
    fn new(capacity: usize) -> Self {
        Self {
            manifests: HashMap::new(),
            latest: None,
            capacity: capacity.max(1),
        }
    }

    /// Cache `manifest`, evicting the oldest entries beyond capacity. The
    /// newest manifest is never evicted.
    fn insert(&mut self, manifest: AnalysisManifest) {
        let key = (manifest.created_at, manifest.request_id);
        if self.latest.is_none_or(|latest| key >= latest) {
            self.latest = Some(key);
        }
        self.manifests.insert(manifest.request_id, manifest);

        while self.manifests.len() > self.capacity {
            let Some(oldest) = self
                .manifests
                .values()
                .map(|m| (m.created_at, m.request_id))
                .min()
            else {
                break;
            };
            self.manifests.remove(&oldest.1);
        }
    }
}

pub struct ArtifactStore {
    root: PathBuf,
    url_prefix: String,
    index: RwLock<Index>,
}

impl ArtifactStore {
    /// Open (creating if needed) the store at `root`. `url_prefix` is where
    /// `root` is served.
    ///
    /// At most `capacity` manifests are held in memory, the most recently
    /// written ones first; the rest are read from disk when asked for.
    pub async fn open(
        root: impl Into<PathBuf>,
        url_prefix: &str,
        capacity: usize,
    ) -> Result<Self, VisionError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let mut written = Vec::new();
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join(MANIFEST);
            let modified = tokio::fs::metadata(&path).await.and_then(|m| m.modified());
            if let Ok(modified) = modified {
                written.push((modified, path));
            }
        }
        written.sort_by(|a, b| b.0.cmp(&a.0));

        let mut index = Index::new(capacity);
        for (_, path) in &written {
            if index.manifests.len() == index.capacity {
                break;
            }
            if let Some(manifest) = read_manifest(path).await? {
                index.insert(manifest);
            }
        }
        info!(
            root = %root.display(),
            on_disk = written.len(),
            cached = index.manifests.len(),
            "artifact store ready"
        );

        Ok(Self {
            root,
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            index: RwLock::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an image below the request's directory and return its URL.
    pub async fn write_image(
        &self,
        request_id: Uuid,
        relative: &str,
        contents: &str,
    ) -> Result<String, VisionError> {
        let path = self.root.join(request_id.to_string()).join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
        Ok(format!("{}/{}/{}", self.url_prefix, request_id, relative))
    }

    /// Persist the manifest and make it visible to lookups.
    pub async fn commit(&self, manifest: &AnalysisManifest) -> Result<(), VisionError> {
        let dir = self.root.join(manifest.request_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(manifest).map_err(std::io::Error::other)?;
        tokio::fs::write(dir.join(MANIFEST), json).await?;

        self.index().insert(manifest.clone());
        Ok(())
    }

    /// Sequence of `move_id` in `request_id`, or in the newest analysis when
    /// no request is given.
    pub async fn sequence(
        &self,
        request_id: Option<Uuid>,
        move_id: u32,
    ) -> Result<MoveArtifacts, VisionError> {
        let request_id = {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            let request_id = request_id
                .or(index.latest.map(|(_, id)| id))
                .ok_or(VisionError::SequenceNotFound(move_id))?;
            if let Some(manifest) = index.manifests.get(&request_id) {
                return manifest
                    .find(move_id)
                    .cloned()
                    .ok_or(VisionError::SequenceNotFound(move_id));
            }
            request_id
        };

        let path = self.root.join(request_id.to_string()).join(MANIFEST);
        let manifest = read_manifest(&path)
            .await?
            .filter(|manifest| manifest.request_id == request_id)
            .ok_or(VisionError::SequenceNotFound(move_id))?;
        debug!(%request_id, "manifest read back from disk");

        let found = manifest.find(move_id).cloned();
        self.index().insert(manifest);
        found.ok_or(VisionError::SequenceNotFound(move_id))
    }

    fn index(&self) -> std::sync::RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `None` when the manifest is missing or unreadable.
async fn read_manifest(path: &Path) -> Result<Option<AnalysisManifest>, VisionError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    match serde_json::from_slice(&raw) {
        Ok(manifest) => Ok(Some(manifest)),
        Err(err) => {
            warn!(path = %path.display(), %err, "skipping unreadable manifest");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("chess-vision-test-{}", Uuid::new_v4()))
    }

    fn manifest(request_id: Uuid, created_at: u64, moves: &[(u32, &str)]) -> AnalysisManifest {
        AnalysisManifest {
            request_id,
            created_at,
            moves: moves
                .iter()
                .map(|&(move_id, uci)| MoveArtifacts {
                    move_id,
                    move_uci: uci.to_string(),
                    board_image: format!("/artifacts/{request_id}/board_{move_id}.svg"),
                    sequence_images: vec![format!("/artifacts/{request_id}/step_1_{uci}.svg")],
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn unknown_move_is_not_found() {
        let root = scratch_dir();
        let store = ArtifactStore::open(&root, "/artifacts", DEFAULT_CACHE_CAPACITY)
            .await
            .unwrap();

        assert!(matches!(
            store.sequence(None, 1).await,
            Err(VisionError::SequenceNotFound(1))
        ));

        let id = Uuid::new_v4();
        store.commit(&manifest(id, 1, &[(1, "e2e4")])).await.unwrap();
        assert!(matches!(
            store.sequence(Some(id), 7).await,
            Err(VisionError::SequenceNotFound(7))
        ));
        assert!(matches!(
            store.sequence(Some(Uuid::new_v4()), 1).await,
            Err(VisionError::SequenceNotFound(1))
        ));

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn latest_analysis_answers_unscoped_lookups() {
        let root = scratch_dir();
        let store = ArtifactStore::open(&root, "/artifacts/", DEFAULT_CACHE_CAPACITY)
            .await
            .unwrap();
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        store.commit(&manifest(newer, 20, &[(1, "d2d4")])).await.unwrap();
        store.commit(&manifest(older, 10, &[(1, "e2e4")])).await.unwrap();

        assert_eq!(store.sequence(None, 1).await.unwrap().move_uci, "d2d4");
        assert_eq!(store.sequence(Some(older), 1).await.unwrap().move_uci, "e2e4");

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn manifests_survive_reopen() {
        let root = scratch_dir();
        let id = Uuid::new_v4();
        {
            let store = ArtifactStore::open(&root, "/artifacts", DEFAULT_CACHE_CAPACITY)
                .await
                .unwrap();
            let url = store
                .write_image(id, "sequences/move_1_g1f3/step_1_g1f3.svg", "<svg/>")
                .await
                .unwrap();
            assert_eq!(
                url,
                format!("/artifacts/{id}/sequences/move_1_g1f3/step_1_g1f3.svg")
            );
            store
                .commit(&manifest(id, 5, &[(1, "g1f3"), (2, "c2c4")]))
                .await
                .unwrap();
        }

        let reopened = ArtifactStore::open(&root, "/artifacts", DEFAULT_CACHE_CAPACITY)
            .await
            .unwrap();
        let seq = reopened.sequence(None, 2).await.unwrap();
        assert_eq!(seq.move_uci, "c2c4");
        let step = root
            .join(id.to_string())
            .join("sequences/move_1_g1f3/step_1_g1f3.svg");
        assert!(step.exists());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn evicted_manifests_are_read_back_from_disk() {
        let root = scratch_dir();
        let store = ArtifactStore::open(&root, "/artifacts", 2).await.unwrap();
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (n, &id) in ids.iter().enumerate() {
            let uci = format!("a2a{}", n + 3);
            store
                .commit(&manifest(id, n as u64 + 1, &[(1, uci.as_str())]))
                .await
                .unwrap();
        }

        {
            let index = store.index.read().unwrap();
            assert_eq!(index.manifests.len(), 2);
            assert!(!index.manifests.contains_key(&ids[0]));
            assert_eq!(index.latest, Some((4, ids[3])));
        }

        assert_eq!(store.sequence(Some(ids[0]), 1).await.unwrap().move_uci, "a2a3");
        // a read-back of an old analysis does not displace the newest
        assert_eq!(store.sequence(None, 1).await.unwrap().move_uci, "a2a6");
        assert_eq!(store.index.read().unwrap().manifests.len(), 2);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn reopen_caches_only_the_newest_manifests() {
        let root = scratch_dir();
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        {
            let store = ArtifactStore::open(&root, "/artifacts", DEFAULT_CACHE_CAPACITY)
                .await
                .unwrap();
            store.commit(&manifest(older, 10, &[(1, "e2e4")])).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            store.commit(&manifest(newer, 20, &[(1, "d2d4")])).await.unwrap();
        }
        std::fs::create_dir_all(root.join("stray")).unwrap();
        std::fs::write(root.join("stray").join(MANIFEST), "not json").unwrap();

        let reopened = ArtifactStore::open(&root, "/artifacts", 1).await.unwrap();
        {
            let index = reopened.index.read().unwrap();
            assert_eq!(index.manifests.len(), 1);
            assert!(index.manifests.contains_key(&newer));
        }
        assert_eq!(reopened.sequence(None, 1).await.unwrap().move_uci, "d2d4");
        assert_eq!(reopened.sequence(Some(older), 1).await.unwrap().move_uci, "e2e4");

        let _ = std::fs::remove_dir_all(root);
    }
}
