//! Before/after action registry.
//!
//! Same segment grammar as the route trie, different matching: kinds
//! coexist at a level and *every* branch that matches a request path
//! contributes its actions. Results come back in registration order, so
//! a broadly-scoped action registered first runs first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use super::trie::PatternSegment;
use crate::error::Error;

pub(crate) struct ActionRegistry<A> {
    root: Arc<ActionNode<A>>,
    seq: AtomicU64,
}

struct ActionNode<A> {
    values: RwLock<Vec<(u64, A)>>,
    statics: RwLock<HashMap<String, Arc<ActionNode<A>>>>,
    param: RwLock<Option<Arc<ActionNode<A>>>>,
    catch_all: RwLock<Option<Arc<ActionNode<A>>>>,
}

impl<A> ActionNode<A> {
    fn new() -> Arc<ActionNode<A>> {
        Arc::new(ActionNode {
            values: RwLock::new(Vec::new()),
            statics: RwLock::new(HashMap::new()),
            param: RwLock::new(None),
            catch_all: RwLock::new(None),
        })
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

impl<A: Clone> ActionRegistry<A> {
    pub(crate) fn new() -> ActionRegistry<A> {
        ActionRegistry {
            root: ActionNode::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Register an action under a pattern. Unlike routes, any number of
    /// actions may share a pattern, and kinds never collide.
    pub(crate) fn insert(&self, segments: &[PatternSegment], action: A) -> Result<(), Error> {
        let mut node = Arc::clone(&self.root);
        for seg in segments {
            let next = match seg {
                PatternSegment::Static(lit) => {
                    let mut statics = node.statics.write().unwrap_or_else(|e| e.into_inner());
                    Arc::clone(statics.entry(lit.clone()).or_insert_with(ActionNode::new))
                }
                PatternSegment::Param(_) => {
                    let mut param = node.param.write().unwrap_or_else(|e| e.into_inner());
                    Arc::clone(param.get_or_insert_with(ActionNode::new))
                }
                PatternSegment::CatchAll(_) => {
                    let mut catch = node.catch_all.write().unwrap_or_else(|e| e.into_inner());
                    Arc::clone(catch.get_or_insert_with(ActionNode::new))
                }
            };
            node = next;
        }
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        node.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, action));
        Ok(())
    }

    /// Every action whose pattern matches the path, registration order.
    pub(crate) fn matching(&self, decoded: &[String]) -> Vec<A> {
        let mut hits: Vec<(u64, A)> = Vec::new();
        Self::collect(&self.root, decoded, 0, &mut hits);
        hits.sort_by_key(|(id, _)| *id);
        hits.into_iter().map(|(_, a)| a).collect()
    }

    fn collect(node: &Arc<ActionNode<A>>, segs: &[String], i: usize, hits: &mut Vec<(u64, A)>) {
        // a catch-all absorbs any remainder, the empty one included
        if let Some(child) = &*read(&node.catch_all) {
            hits.extend(read(&child.values).iter().cloned());
        }
        if i == segs.len() {
            hits.extend(read(&node.values).iter().cloned());
            return;
        }
        if let Some(child) = read(&node.statics).get(&segs[i]) {
            Self::collect(child, segs, i + 1, hits);
        }
        if let Some(child) = &*read(&node.param) {
            Self::collect(child, segs, i + 1, hits);
        }
    }
}

impl<A> std::fmt::Debug for ActionRegistry<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ActionRegistry")
    }
}
