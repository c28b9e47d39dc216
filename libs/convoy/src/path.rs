use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::geo::{EntityId, Position};

/// Immutable snapshot of an entity's travelled positions, oldest first.
pub type Path = Arc<[Position]>;

/// How much of a path is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Retention {
    #[default]
    Unbounded,
    /// Keep only the newest `n` positions.
    Window(NonZeroUsize),
}

#[derive(Debug, Default)]
pub struct EntityPathAccumulator {
    paths: HashMap<EntityId, Path>,
    retention: Retention,
}

impl EntityPathAccumulator {
    pub fn new(retention: Retention) -> Self {
        Self {
            paths: HashMap::new(),
            retention,
        }
    }

    /// Appends `pos` and returns the new path. Snapshots handed out earlier
    /// are never touched.
    pub fn append(&mut self, id: &EntityId, pos: Position) -> Path {
        let path = self.extended(id, pos);
        self.insert(id, path.clone());
        path
    }

    /// The path `append` would produce, without recording it.
    pub fn extended(&self, id: &EntityId, pos: Position) -> Path {
        let prev = self.paths.get(id).map(|p| &p[..]).unwrap_or(&[]);
        let skip = match self.retention {
            Retention::Unbounded => 0,
            Retention::Window(n) => (prev.len() + 1).saturating_sub(n.get()),
        };
        prev.iter()
            .skip(skip)
            .copied()
            .chain(std::iter::once(pos))
            .collect()
    }

    pub fn insert(&mut self, id: &EntityId, path: Path) {
        self.paths.insert(id.clone(), path);
    }

    pub fn path(&self, id: &EntityId) -> Option<Path> {
        self.paths.get(id).cloned()
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<Path> {
        self.paths.remove(id)
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
