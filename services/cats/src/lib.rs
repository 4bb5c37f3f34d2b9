//! Pet Battle Cat Service
//!
//! Stores cat pictures, ranks them by votes and keeps images classified
//! "not safe for work" out of every listing. Each upload runs through a fixed
//! pipeline before it is accepted.
//!
//! ## Features
//!
//! - **Bounded images**: uploads are decoded, shrunk to a maximum dimension and
//!   re-encoded as data URIs
//! - **NSFW gate**: an external classification service decides whether a cat is
//!   safe; the gate can be switched off, and its failure policy is configurable
//! - **Ranking**: every submission counts as a vote; unsafe cats are pinned to a
//!   sentinel weight so they never reach the top cats
//! - **Seeding**: a bundled litter of sample cats is loaded into an empty store
//!
//! ## Architecture
//!
//! ```text
//!  POST /cats
//!      │
//!      ▼
//! ┌──────────────┐   resize   ┌──────────────┐
//! │ Upload       │───────────▶│ Image        │
//! │ Pipeline     │            │ Codec        │
//! └──────────────┘            └──────────────┘
//!      │    ▲
//!      │    │ verdict         ┌──────────────┐       ┌──────────────┐
//!      │    └─────────────────│ Classifi-    │──────▶│ NSFW         │
//!      │                      │ cation Gate  │ HTTP  │ service      │
//!      │ save (x2)            └──────────────┘       └──────────────┘
//!      ▼
//! ┌──────────────┐            ┌──────────────┐
//! │ Cat Store    │◀───────────│ Cats API     │ GET /cats, /topcats, ...
//! │ (PostgreSQL) │            │ (axum)       │
//! └──────────────┘            └──────────────┘
//! ```

pub mod api;
pub mod cat;
pub mod cat_store;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod litter;
pub mod pg_cat_store;
pub mod pipeline;

pub use api::{create_router, AppState, DataTable, ErrorResponse};
pub use cat::{Cat, CatId, Verdict, EXCLUSION_SENTINEL};
pub use cat_store::{CatQuery, CatStore, MemoryCatStore, StoreError};
pub use classifier::{
    ClassificationError, ClassificationGate, HttpNsfwClassifier, NsfwClassifier,
};
pub use codec::{CodecError, ImageCodec};
pub use config::{Config, FailurePolicy};
pub use litter::LitterLoader;
pub use pg_cat_store::PgCatStore;
pub use pipeline::{SubmitError, UploadPipeline};
