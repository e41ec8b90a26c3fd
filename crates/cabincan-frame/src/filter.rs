use serde::{Deserialize, Serialize};

/// Acceptance rule deciding which frame ids a subscription receives.
///
/// Filters are owned values: the `List` variant owns its ids, so the
/// registering caller may drop or reuse its source buffer immediately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filter {
    /// Inclusive `min..=max` match.
    Range { min: u32, max: u32 },
    /// Match iff `(frame_id & mask) == (id & mask)`.
    Mask { id: u32, mask: u32 },
    /// Exact membership. An empty list matches nothing.
    List { ids: Vec<u32> },
}

impl Filter {
    /// The canonical match-everything filter, `Mask { id: 0, mask: 0 }`.
    pub const fn all() -> Self {
        Filter::Mask { id: 0, mask: 0 }
    }

    /// Single-id filter.
    pub const fn exact(id: u32) -> Self {
        Filter::Range { min: id, max: id }
    }

    pub fn list(ids: impl Into<Vec<u32>>) -> Self {
        Filter::List { ids: ids.into() }
    }

    /// Pure match predicate.
    pub fn matches(&self, id: u32) -> bool {
        match self {
            Filter::Range { min, max } => *min <= id && id <= *max,
            Filter::Mask { id: want, mask } => (id & mask) == (want & mask),
            // Subscription counts are small; a linear scan is enough.
            Filter::List { ids } => ids.contains(&id),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

/// Match an optional filter. `None` accepts every id.
pub fn filter_match(filter: Option<&Filter>, id: u32) -> bool {
    filter.is_none_or(|f| f.matches(id))
}
