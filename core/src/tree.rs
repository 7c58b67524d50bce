//! Parent/child bookkeeping shared by datasets, grids and fields.
//!
//! Parents own their children by value. A child only remembers the
//! [`NodeId`] of its parent, never a second owning handle.

use std::{
    collections::BTreeMap,
    ops::Deref,
    sync::atomic::{AtomicU64, Ordering},
};

use derive_more::Display;
use tracing::trace;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "#{}", _0)]
pub struct NodeId(u64);

impl NodeId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeMeta {
    pub id: NodeId,
    pub name: String,
    pub parent: Option<NodeId>,
    pub time: Option<f64>,
    pub info: BTreeMap<String, String>,
}

impl NodeMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NodeId::next(),
            name: name.into(),
            parent: None,
            time: None,
            info: BTreeMap::new(),
        }
    }

    /// Same metadata under a fresh id, detached from any parent.
    pub fn fork(&self) -> Self {
        Self {
            id: NodeId::next(),
            parent: None,
            ..self.clone()
        }
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }
}

pub trait Node {
    fn meta(&self) -> &NodeMeta;

    fn meta_mut(&mut self) -> &mut NodeMeta;

    /// Drops whatever this node (and everything below it) has loaded.
    fn clear_cache(&self);

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn id(&self) -> NodeId {
        self.meta().id
    }

    fn parent(&self) -> Option<NodeId> {
        self.meta().parent
    }

    fn time(&self) -> Option<f64> {
        self.meta().time
    }

    fn set_time(&mut self, time: f64) {
        self.meta_mut().time = Some(time);
    }

    fn info(&self, key: &str) -> Option<&str> {
        self.meta().info.get(key).map(String::as_str)
    }

    fn set_info(&mut self, key: impl Into<String>, value: impl Into<String>)
    where
        Self: Sized,
    {
        self.meta_mut().info.insert(key.into(), value.into());
    }

    /// Runs when `child` is attached. Children inherit any info key they do
    /// not set themselves.
    fn prepare_child(&self, child: &mut dyn Node) {
        trace!(parent = %self.id(), child = %child.id(), "Attaching child");
        let meta = child.meta_mut();
        meta.parent = Some(self.meta().id);
        for (k, v) in &self.meta().info {
            meta.info.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// Runs when `child` is detached.
    fn tear_down_child(&self, child: &mut dyn Node) {
        trace!(parent = %self.id(), child = %child.id(), "Detaching child");
        child.clear_cache();
        child.meta_mut().parent = None;
    }

    /// Borrows the node for a scope. Its caches are cleared when the guard
    /// goes away.
    fn scoped(&self) -> CacheGuard<'_, Self>
    where
        Self: Sized,
    {
        CacheGuard { node: self }
    }
}

/// Clears the caches of the borrowed node on drop.
#[derive(Debug)]
pub struct CacheGuard<'a, T: Node + ?Sized> {
    node: &'a T,
}

impl<'a, T: Node + ?Sized> CacheGuard<'a, T> {
    pub fn new(node: &'a T) -> Self {
        Self { node }
    }

    /// Ends the scope now and keeps the plain borrow.
    pub fn release(self) -> &'a T {
        let node = self.node;
        drop(self);
        node
    }
}

impl<T: Node + ?Sized> Deref for CacheGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.node
    }
}

impl<T: Node + ?Sized> Drop for CacheGuard<'_, T> {
    fn drop(&mut self) {
        self.node.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug)]
    struct Leaf {
        meta: NodeMeta,
        clears: Cell<usize>,
    }

    impl Node for Leaf {
        fn meta(&self) -> &NodeMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut NodeMeta {
            &mut self.meta
        }

        fn clear_cache(&self) {
            self.clears.set(self.clears.get() + 1);
        }
    }

    fn leaf(name: &str) -> Leaf {
        Leaf {
            meta: NodeMeta::new(name),
            clears: Cell::new(0),
        }
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(NodeId::next(), NodeId::next());
        assert!(NodeId::next().to_string().starts_with('#'));
    }

    #[test]
    fn attach_and_detach() {
        let mut parent = leaf("parent");
        parent.set_info("run", "a");
        let mut child = leaf("child");
        child.set_info("run", "b");
        child.set_info("other", "c");

        parent.prepare_child(&mut child);
        assert_eq!(child.parent(), Some(parent.id()));
        assert_eq!(child.info("run"), Some("b"));

        let mut bare = leaf("bare");
        parent.prepare_child(&mut bare);
        assert_eq!(bare.info("run"), Some("a"));

        parent.tear_down_child(&mut child);
        assert_eq!(child.parent(), None);
        assert_eq!(child.clears.get(), 1);
    }

    #[test]
    fn guard_clears_on_drop() {
        let node = leaf("n");
        {
            let guard = node.scoped();
            assert_eq!(guard.name(), "n");
        }
        assert_eq!(node.clears.get(), 1);

        let plain = node.scoped().release();
        assert_eq!(node.clears.get(), 2);
        assert_eq!(plain.name(), "n");
    }
}
