use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ranking weight given to cats classified unsafe so they never reach a top-N listing
pub const EXCLUSION_SENTINEL: i32 = -1000;

/// Outcome of NSFW classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub safe: bool,
}

impl Verdict {
    pub const SAFE: Verdict = Verdict { safe: true };
    pub const UNSAFE: Verdict = Verdict { safe: false };
}

/// A cat submission and its stored record.
///
/// `count` and `issfw` are only changed through [`Cat::vote`] and
/// [`Cat::apply_verdict`]; the identifier is assigned once, by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cat {
    /// Store-assigned identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    /// Image as a data URI (`data:image/jpeg;base64,...`)
    pub image: String,
    /// Ranking weight
    #[serde(default)]
    count: i32,
    /// Classification result; `None` until classified
    #[serde(default, rename = "issfw")]
    is_safe_for_work: Option<bool>,
    /// Whether this submission already counted as a vote
    #[serde(default, rename = "vote")]
    pub voted: bool,
}

/// Identifier-only projection of a cat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatId {
    pub id: Uuid,
}

impl Cat {
    /// A fresh, unsaved cat
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Rebuild a cat from stored fields
    pub fn restore(
        id: Uuid,
        image: String,
        count: i32,
        is_safe_for_work: Option<bool>,
        voted: bool,
    ) -> Self {
        Self {
            id: Some(id),
            image,
            count,
            is_safe_for_work,
            voted,
        }
    }

    /// A bundled sample cat, pre-flagged safe with a starting weight
    pub fn seeded(image: impl Into<String>, count: i32) -> Self {
        Self {
            id: None,
            image: image.into(),
            count,
            is_safe_for_work: Some(true),
            voted: false,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn is_safe_for_work(&self) -> Option<bool> {
        self.is_safe_for_work
    }

    /// Count this submission as one vote
    pub fn vote(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Forget any classification result carried by the submission
    pub fn reset_verdict(&mut self) {
        self.is_safe_for_work = None;
    }

    /// Record the classification result; unsafe cats drop to the exclusion sentinel
    pub fn apply_verdict(&mut self, verdict: Verdict) {
        self.is_safe_for_work = Some(verdict.safe);
        if !verdict.safe {
            self.count = EXCLUSION_SENTINEL;
        }
    }

    /// Assign the store identifier if none is set yet, returning the effective id
    pub fn assign_id(&mut self, id: Uuid) -> Uuid {
        *self.id.get_or_insert(id)
    }

    /// Two cats are the same entity iff both are persisted under the same id
    pub fn is_same_entity(&self, other: &Cat) -> bool {
        matches!((self.id, other.id), (Some(a), Some(b)) if a == b)
    }
}
