//! The upload pipeline: vote, resize, provisional save, classify, final save.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cat::Cat;
use crate::cat_store::{CatStore, StoreError};
use crate::classifier::ClassificationGate;
use crate::codec::{CodecError, ImageCodec};

/// Why a submission was not accepted
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The image could not be decoded; nothing was stored
    #[error("Bad image: {0}")]
    BadImage(#[from] CodecError),

    /// The image was classified unsafe; the record is kept, flagged, for moderation
    #[error("Cat {id} classified not safe for work")]
    Unsafe { id: Uuid },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Sequences codec, store and classification for each submitted cat.
///
/// Each step completes before the next starts. Between the provisional and the
/// final save, readers may see the record with `issfw` unset.
pub struct UploadPipeline {
    store: Arc<dyn CatStore>,
    codec: ImageCodec,
    gate: ClassificationGate,
}

impl UploadPipeline {
    pub fn new(store: Arc<dyn CatStore>, codec: ImageCodec, gate: ClassificationGate) -> Self {
        Self { store, codec, gate }
    }

    pub fn store(&self) -> &Arc<dyn CatStore> {
        &self.store
    }

    /// Create or update a cat, returning its id when it is accepted as safe
    #[instrument(skip(self, cat), fields(cat_id = ?cat.id()))]
    pub async fn submit(&self, mut cat: Cat) -> Result<Uuid, SubmitError> {
        metrics::counter!("cats.uploaded").increment(1);

        cat.vote();
        // Only the classifier decides issfw
        cat.reset_verdict();

        cat.image = self.codec.resize(&cat.image).map_err(|e| {
            warn!(error = %e, "Rejecting undecodable image");
            metrics::counter!("cats.rejected.bad_image").increment(1);
            SubmitError::BadImage(e)
        })?;

        // Provisional save so the verdict can be attached by id
        let id = self.store.persist_or_update(&mut cat).await?;

        let verdict = self.gate.classify(id, &cat.image).await;
        cat.apply_verdict(verdict);

        self.store.persist_or_update(&mut cat).await?;

        if verdict.safe {
            metrics::counter!("cats.accepted").increment(1);
            info!(cat_id = %id, count = cat.count(), "Cat accepted");
            Ok(id)
        } else {
            metrics::counter!("cats.rejected.unsafe").increment(1);
            info!(cat_id = %id, "Cat rejected as not safe for work");
            Err(SubmitError::Unsafe { id })
        }
    }

    /// Store a bundled sample cat: resized and saved without voting or classification
    #[instrument(skip(self, cat))]
    pub async fn submit_preclassified(&self, mut cat: Cat) -> Result<Uuid, SubmitError> {
        cat.image = self.codec.resize(&cat.image)?;
        let id = self.store.persist_or_update(&mut cat).await?;
        Ok(id)
    }
}
