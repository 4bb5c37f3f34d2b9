//! Seed loader for the bundled sample cats ("the litter").

use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, instrument, warn};

use crate::cat::Cat;
use crate::cat_store::{CatQuery, StoreError};
use crate::codec::to_data_uri;
use crate::pipeline::{SubmitError, UploadPipeline};

/// Loads sample images into an empty store.
///
/// `seed_once` runs at most once per process no matter how many callers race it;
/// `load_if_empty` may be called repeatedly and serializes the empty check with
/// the inserts.
pub struct LitterLoader {
    pipeline: Arc<UploadPipeline>,
    directory: PathBuf,
    startup: OnceCell<usize>,
    loading: Mutex<()>,
}

impl LitterLoader {
    pub fn new(pipeline: Arc<UploadPipeline>, directory: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            directory: directory.into(),
            startup: OnceCell::new(),
            loading: Mutex::new(()),
        }
    }

    /// Startup seeding; later calls return the first result without touching the store
    pub async fn seed_once(&self) -> Result<usize, StoreError> {
        self.startup
            .get_or_try_init(|| self.load_if_empty())
            .await
            .copied()
    }

    /// Load the litter when the store holds no cats, returning how many were added
    #[instrument(skip(self), fields(directory = %self.directory.display()))]
    pub async fn load_if_empty(&self) -> Result<usize, StoreError> {
        let _guard = self.loading.lock().await;

        let store = self.pipeline.store();
        if store.count(&CatQuery::default()).await? > 0 {
            info!("Store already has cats, skipping litter");
            return Ok(0);
        }

        let files = match litter_files(&self.directory).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Cannot read litter directory");
                return Ok(0);
            }
        };

        let mut loaded = 0;
        for path in files {
            let Some(image) = read_data_uri(&path).await else {
                continue;
            };

            let count = rand::thread_rng().gen_range(1..=5);
            match self.pipeline.submit_preclassified(Cat::seeded(image, count)).await {
                Ok(id) => {
                    loaded += 1;
                    info!(cat_id = %id, file = %path.display(), count, "Seeded cat");
                }
                Err(SubmitError::Persistence(e)) => return Err(e),
                Err(e) => warn!(error = %e, file = %path.display(), "Skipping litter image"),
            }
        }

        metrics::counter!("cats.seeded").increment(loaded as u64);
        info!(loaded, "Litter loaded");

        Ok(loaded)
    }
}

/// Image files in `dir`, sorted by file name
async fn litter_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if mime_for(&path).is_some() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpeg" | "jpg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

async fn read_data_uri(path: &Path) -> Option<String> {
    let mime = mime_for(path)?;
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(to_data_uri(mime, &bytes)),
        Err(e) => {
            warn!(error = %e, file = %path.display(), "Failed to read litter image");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cat_store::{CatStore, MemoryCatStore};
    use crate::classifier::ClassificationGate;
    use crate::codec::ImageCodec;
    use crate::config::ImageConfig;

    fn temp_litter(name: &str, files: &[(&str, Vec<u8>)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("litter-{}-{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        for (file, bytes) in files {
            std::fs::write(dir.join(file), bytes).unwrap();
        }
        dir
    }

    fn png_bytes(size: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(size, size, image::Rgb([10, 20, 30]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn loader(store: Arc<MemoryCatStore>, dir: &Path) -> LitterLoader {
        let pipeline = UploadPipeline::new(
            store,
            ImageCodec::new(&ImageConfig::default()),
            ClassificationGate::disabled(),
        );
        LitterLoader::new(Arc::new(pipeline), dir)
    }

    #[tokio::test]
    async fn test_loads_images_into_empty_store() {
        let dir = temp_litter(
            "load",
            &[
                ("cat1.png", png_bytes(32)),
                ("cat2.PNG", png_bytes(48)),
                ("broken.jpeg", b"not a jpeg".to_vec()),
                ("notes.txt", b"ignored".to_vec()),
            ],
        );
        let store = Arc::new(MemoryCatStore::new());

        let loaded = loader(store.clone(), &dir).load_if_empty().await.unwrap();
        assert_eq!(loaded, 2);

        let cats = store.find_all(&CatQuery::default()).await.unwrap();
        assert!(cats
            .iter()
            .all(|c| c.is_safe_for_work() == Some(true) && (1..=5).contains(&c.count()) && !c.voted));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_skips_non_empty_store() {
        let dir = temp_litter("skip", &[("cat1.png", png_bytes(16))]);
        let store = Arc::new(MemoryCatStore::new());
        store
            .persist_or_update(&mut Cat::seeded("existing", 1))
            .await
            .unwrap();

        assert_eq!(loader(store.clone(), &dir).load_if_empty().await.unwrap(), 0);
        assert_eq!(store.count(&CatQuery::default()).await.unwrap(), 1);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_seed_once_runs_once_under_concurrency() {
        let dir = temp_litter(
            "once",
            &[("cat1.png", png_bytes(16)), ("cat2.png", png_bytes(16))],
        );
        let store = Arc::new(MemoryCatStore::new());
        let loader = Arc::new(loader(store.clone(), &dir));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let loader = loader.clone();
                tokio::spawn(async move { loader.seed_once().await.unwrap() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 2);
        }
        assert_eq!(store.count(&CatQuery::default()).await.unwrap(), 2);

        // Emptying the store does not re-arm startup seeding
        store.delete_all().await.unwrap();
        assert_eq!(loader.seed_once().await.unwrap(), 2);
        assert_eq!(store.count(&CatQuery::default()).await.unwrap(), 0);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_store_failure_stops_loading() {
        let dir = temp_litter(
            "fail",
            &[("cat1.png", png_bytes(16)), ("cat2.png", png_bytes(16))],
        );
        let mut store = crate::cat_store::MockCatStore::new();
        store.expect_count().returning(|_| Ok(0));
        store
            .expect_persist_or_update()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("connection refused".to_string())));
        let pipeline = UploadPipeline::new(
            Arc::new(store),
            ImageCodec::new(&ImageConfig::default()),
            ClassificationGate::disabled(),
        );
        let loader = LitterLoader::new(Arc::new(pipeline), &dir);

        assert!(matches!(
            loader.load_if_empty().await,
            Err(StoreError::Unavailable(_))
        ));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_missing_directory_loads_nothing() {
        let store = Arc::new(MemoryCatStore::new());
        let missing = std::env::temp_dir().join(format!("no-litter-{}", uuid::Uuid::new_v4()));
        assert_eq!(loader(store, &missing).load_if_empty().await.unwrap(), 0);
    }
}
