//! Symlink-collapsing tree resolver.
//!
//! Turns the flat member table of a [`TarIndex`] into an arena of nodes.
//! Directories map child names to [`NodeId`]s; a symlink never becomes a node
//! of its own, its parent's child slot holds the id of the node it points at.
//!
//! Resolution is memoized per raw member path. A path that is re-entered while
//! still being resolved is a cycle. A symlink whose target is declared only
//! through another alias that has not been placed yet is deferred and retried
//! once the rest of the table has been placed, so the result does not depend
//! on the order of members in the archive.

use chrono::{DateTime, Utc};
use log::{debug, trace};
use std::collections::{BTreeMap, HashMap, HashSet};
use tarfs_format::{path, EntryKind, Error, RawEntry, Result, Span, TarIndex};

/// Index of a node in the arena.
pub(crate) type NodeId = usize;

/// The archive root is always the first node.
pub(crate) const ROOT: NodeId = 0;

#[derive(Debug)]
pub(crate) enum NodeKind {
    File(Span),
    Dir(BTreeMap<String, NodeId>),
}

/// A resolved file or directory.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) size: u64,
    pub(crate) mode: u32,
    pub(crate) modified: DateTime<Utc>,
}

impl Node {
    fn from_entry(entry: &RawEntry) -> Self {
        let kind = match entry.kind {
            EntryKind::File => NodeKind::File(entry.span.unwrap_or_default()),
            EntryKind::Dir | EntryKind::Symlink => NodeKind::Dir(BTreeMap::new()),
        };
        Self {
            kind,
            size: entry.size,
            mode: entry.mode,
            modified: entry.modified,
        }
    }

    pub(crate) fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir(_))
    }

    pub(crate) fn children(&self) -> Option<&BTreeMap<String, NodeId>> {
        match &self.kind {
            NodeKind::Dir(children) => Some(children),
            NodeKind::File(_) => None,
        }
    }
}

/// Immutable, acyclic node graph of an archive.
#[derive(Debug)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Resolve every member of `index`.
    ///
    /// # Errors
    ///
    /// - [`Error::Cycle`] when symlinks point back into themselves
    /// - [`Error::NotADirectory`] when a path descends through a file
    /// - [`Error::NotExist`] when a path descends through a dangling symlink
    /// - [`Error::Conflict`] when a file and another member land on the same
    ///   location
    pub(crate) fn build(index: &TarIndex) -> Result<Self> {
        Resolver::new(index).run()
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Number of distinct nodes, the root included.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Walk `path` down from `from`. `path` must already be validated;
    /// `""` returns `from`.
    pub(crate) fn lookup(&self, from: NodeId, path: &str) -> Result<NodeId> {
        let mut id = from;
        for name in path::components(path) {
            id = match &self.nodes[id].kind {
                NodeKind::Dir(children) => *children
                    .get(name)
                    .ok_or_else(|| Error::NotExist(path.to_string()))?,
                NodeKind::File(_) => return Err(Error::NotADirectory(path.to_string())),
            };
        }
        Ok(id)
    }
}

/// Why a resolution step did not produce a node.
enum Miss {
    /// Construction must abort.
    Fatal(Error),
    /// The named path is not in the tree yet; the step may succeed later.
    Missing(String),
}

impl From<Error> for Miss {
    fn from(err: Error) -> Self {
        Miss::Fatal(err)
    }
}

type Step<T> = std::result::Result<T, Miss>;

struct Resolver<'a> {
    index: &'a TarIndex,
    nodes: Vec<Node>,
    /// Canonical path and originating member path of each node.
    origins: Vec<(String, &'a str)>,
    /// Whether each node's metadata still comes from a synthesized directory.
    placeholder: Vec<bool>,
    resolved: HashMap<&'a str, NodeId>,
    in_progress: HashSet<&'a str>,
}

impl<'a> Resolver<'a> {
    fn new(index: &'a TarIndex) -> Self {
        Self {
            index,
            nodes: vec![Node::from_entry(index.root())],
            origins: vec![(String::new(), "")],
            placeholder: vec![index.root().implicit],
            resolved: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    fn run(mut self) -> Result<Tree> {
        let index = self.index;
        let mut pending: Vec<&'a RawEntry> = index.entries().iter().collect();
        let mut passes = 1;

        loop {
            let mut deferred = Vec::new();
            for &entry in &pending {
                match self.resolve(entry.path.as_str()) {
                    Ok(_) => {}
                    Err(Miss::Missing(target)) => {
                        trace!("deferring {:?}: {:?} is not placed yet", entry.path, target);
                        deferred.push(entry);
                    }
                    Err(Miss::Fatal(err)) => return Err(err),
                }
            }

            if deferred.is_empty() {
                break;
            }
            if deferred.len() == pending.len() {
                self.drop_dangling(&deferred)?;
                break;
            }
            pending = deferred;
            passes += 1;
        }

        debug!(
            "resolved {} entries into {} nodes in {} pass(es)",
            index.len(),
            self.nodes.len(),
            passes
        );
        Ok(Tree { nodes: self.nodes })
    }

    /// Final pass once nothing else can be placed. Symlinks whose targets are
    /// missing are left out; anything that has to descend through one fails.
    fn drop_dangling(&mut self, deferred: &[&'a RawEntry]) -> Result<()> {
        for &entry in deferred {
            let (parent, _) = path::split(entry.path.as_str());
            let missing = match self.resolve(parent) {
                Ok(_) if entry.kind == EntryKind::Symlink => {
                    debug!(
                        "dropping dangling symlink {:?} -> {:?}",
                        entry.path,
                        entry.link_target.as_deref().unwrap_or_default()
                    );
                    continue;
                }
                Ok(_) => entry.path.clone(),
                Err(Miss::Missing(target)) => target,
                Err(Miss::Fatal(err)) => return Err(err),
            };
            return Err(Error::NotExist(missing));
        }
        Ok(())
    }

    fn resolve(&mut self, raw: &'a str) -> Step<NodeId> {
        if raw.is_empty() {
            return Ok(ROOT);
        }
        if let Some(&id) = self.resolved.get(raw) {
            return Ok(id);
        }
        if !self.in_progress.insert(raw) {
            return Err(Error::Cycle(raw.to_string()).into());
        }

        let result = self.materialize(raw);
        self.in_progress.remove(raw);
        if let Ok(id) = result {
            self.resolved.insert(raw, id);
        }
        result
    }

    fn materialize(&mut self, raw: &'a str) -> Step<NodeId> {
        let index = self.index;
        let entry = index
            .get(raw)
            .ok_or_else(|| Miss::Missing(raw.to_string()))?;
        let (parent_raw, name) = path::split(raw);

        let parent = self.resolve(parent_raw)?;
        if !self.nodes[parent].is_dir() {
            return Err(Error::NotADirectory(parent_raw.to_string()).into());
        }

        let id = match entry.kind {
            // Two directory members reached through different aliases are
            // the same directory.
            EntryKind::Dir => match self.child(parent, name) {
                Some(existing) if self.nodes[existing].is_dir() => {
                    self.merge_dir(existing, entry);
                    existing
                }
                _ => self.place(parent, name, entry, raw),
            },
            EntryKind::File => self.place(parent, name, entry, raw),
            EntryKind::Symlink => {
                let target = entry.link_target.as_deref().unwrap_or_default();
                let target = path::resolve_link(&self.origins[parent].0, target);
                trace!("symlink {:?} -> {:?}", raw, target);

                let id = self.lookup(&target)?;
                if self.reaches(id, parent) {
                    return Err(Error::Cycle(raw.to_string()).into());
                }
                id
            }
        };

        self.attach(parent, name, id, raw)?;
        Ok(id)
    }

    /// Find the node at canonical or raw `target`, resolving members on the
    /// way.
    fn lookup(&mut self, target: &str) -> Step<NodeId> {
        if target.is_empty() {
            return Ok(ROOT);
        }
        let index = self.index;
        if let Some(entry) = index.get(target) {
            return self.resolve(entry.path.as_str());
        }

        let (parent, name) = path::split(target);
        let dir = self.lookup(parent)?;
        if !self.nodes[dir].is_dir() {
            return Err(Error::NotADirectory(parent.to_string()).into());
        }
        if let Some(id) = self.child(dir, name) {
            return Ok(id);
        }

        // The child may be declared under the directory's own member path
        // rather than the aliased one being walked.
        let candidates = {
            let (canonical, origin) = &self.origins[dir];
            [path::join(canonical, name), path::join(origin, name)]
        };
        for candidate in &candidates {
            if let Some(entry) = index.get(candidate) {
                return self.resolve(entry.path.as_str());
            }
        }

        Err(Miss::Missing(target.to_string()))
    }

    fn place(&mut self, parent: NodeId, name: &str, entry: &RawEntry, raw: &'a str) -> NodeId {
        let canonical = path::join(&self.origins[parent].0, name);
        self.nodes.push(Node::from_entry(entry));
        self.origins.push((canonical, raw));
        self.placeholder.push(entry.implicit);
        self.nodes.len() - 1
    }

    /// Fold directory member `entry` into the already placed directory `id`.
    /// Explicit metadata replaces synthesized metadata; otherwise the first
    /// placed member keeps its mode and mtime.
    fn merge_dir(&mut self, id: NodeId, entry: &RawEntry) {
        trace!(
            "merging directory {:?} into {:?}",
            entry.path,
            self.origins[id].0
        );
        if self.placeholder[id] && !entry.implicit {
            let node = &mut self.nodes[id];
            node.mode = entry.mode;
            node.modified = entry.modified;
            self.placeholder[id] = false;
        }
    }

    fn attach(&mut self, parent: NodeId, name: &str, id: NodeId, raw: &str) -> Result<()> {
        if let Some(existing) = self.child(parent, name) {
            if existing == id {
                return Ok(());
            }
            return Err(Error::Conflict {
                path: raw.to_string(),
                existing: self.kind(existing),
                incoming: self.kind(id),
            });
        }
        if let NodeKind::Dir(children) = &mut self.nodes[parent].kind {
            children.insert(name.to_string(), id);
        }
        Ok(())
    }

    fn child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[dir]
            .children()
            .and_then(|children| children.get(name).copied())
    }

    fn kind(&self, id: NodeId) -> EntryKind {
        match self.nodes[id].kind {
            NodeKind::File(_) => EntryKind::File,
            NodeKind::Dir(_) => EntryKind::Dir,
        }
    }

    /// Whether `to` can be reached from `from` through child links,
    /// `from == to` included. Aliasing `from` under `to` would then close a
    /// cycle.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(children) = self.nodes[id].children() {
                stack.extend(children.values().copied());
            }
        }
        false
    }
}
