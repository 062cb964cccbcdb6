//! The set of documents a query may draw from

use crate::corpus::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Document ids eligible for one query
///
/// Built by the caller (typically from a session's active documents) and
/// only read by retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionScope {
    ids: BTreeSet<DocumentId>,
}

impl SessionScope {
    pub fn from_ids(ids: impl IntoIterator<Item = DocumentId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, document_id: DocumentId) -> bool {
        self.ids.contains(&document_id)
    }

    /// Ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<DocumentId> for SessionScope {
    fn from_iter<T: IntoIterator<Item = DocumentId>>(iter: T) -> Self {
        Self::from_ids(iter)
    }
}
