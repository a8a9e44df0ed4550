use std::collections::BTreeMap;
use std::fmt;

use super::checked::NodeId;
use super::value::Value;

/// One sub-expression value observed during an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub id: NodeId,
    pub value: Value,
}

/// The values computed at each evaluated sub-expression, sorted by ascending
/// node id.
///
/// Nodes skipped by short-circuiting or that failed have no entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub(crate) fn from_map(values: BTreeMap<NodeId, Value>) -> Self {
        Self {
            entries: values
                .into_iter()
                .map(|(id, value)| TraceEntry { id, value })
                .collect(),
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// The value recorded for a node, if it was evaluated.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Value> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| &self.entries[idx].value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", entry.id, entry.value)?;
        }
        Ok(())
    }
}
