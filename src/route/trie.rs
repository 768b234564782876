//! A concurrent segment trie for route patterns.
//!
//! One child kind per level: a node's children are either static
//! literals, a single `:param`, or a `*catch-all`; mixing kinds at the
//! same level is a registration collision. Lookups are lock-brief reads
//! with no cross-kind backtracking. Writers reserve every node they
//! traverse, which pins those nodes against a concurrent prune; a
//! pruned-node sentinel makes a writer that lost the race start over.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, User};

/// One segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PatternSegment {
    Static(String),
    Param(String),
    CatchAll(String),
}

/// Parse a `/`-separated pattern into segments.
///
/// `:name` is a single-segment parameter, `*name` a catch-all that must
/// come last. Empty segments (and a missing leading slash) are syntax
/// errors; the sole exception is the root pattern `/`.
pub(crate) fn parse_pattern(pattern: &str) -> Result<Vec<PatternSegment>, Error> {
    let syntax = |detail: &'static str| Error::new_user(User::PatternSyntax).with(detail);
    let rest = pattern
        .strip_prefix('/')
        .ok_or_else(|| syntax("pattern must start with '/'"))?;
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for seg in rest.split('/') {
        if let Some(PatternSegment::CatchAll(_)) = segments.last() {
            return Err(syntax("catch-all must be the last segment"));
        }
        if seg.is_empty() {
            return Err(syntax("empty segment"));
        }
        segments.push(if let Some(name) = seg.strip_prefix(':') {
            if name.is_empty() {
                return Err(syntax("parameter segment without a name"));
            }
            PatternSegment::Param(name.to_owned())
        } else if let Some(name) = seg.strip_prefix('*') {
            if name.is_empty() {
                return Err(syntax("catch-all segment without a name"));
            }
            PatternSegment::CatchAll(name.to_owned())
        } else {
            PatternSegment::Static(seg.to_owned())
        });
    }
    Ok(segments)
}

/// A successful lookup.
#[derive(Debug)]
pub(crate) struct TrieMatch<V> {
    pub(crate) value: Arc<V>,
    /// `(raw, decoded)` per parameter position, in pattern order.
    pub(crate) params: Vec<(String, String)>,
    /// `(raw, decoded)` remainder bound by a catch-all; both begin with
    /// `/`, and an empty remainder is the default `/`.
    pub(crate) catch_all: Option<(String, String)>,
}

pub(crate) struct Trie<V> {
    root: Arc<Node<V>>,
    pruning: AtomicBool,
}

struct Node<V> {
    value: RwLock<Option<Arc<V>>>,
    children: RwLock<Children<V>>,
    reserved: AtomicUsize,
    pruned: AtomicBool,
}

enum Children<V> {
    Empty,
    Statics(HashMap<String, Arc<Node<V>>>),
    Param(Arc<Node<V>>),
    CatchAll(Arc<Node<V>>),
}

impl<V> Node<V> {
    fn new() -> Arc<Node<V>> {
        Arc::new(Node {
            value: RwLock::new(None),
            children: RwLock::new(Children::Empty),
            reserved: AtomicUsize::new(0),
            pruned: AtomicBool::new(false),
        })
    }

    fn value_read(&self) -> RwLockReadGuard<'_, Option<Arc<V>>> {
        self.value.read().unwrap_or_else(|e| e.into_inner())
    }

    fn value_write(&self) -> RwLockWriteGuard<'_, Option<Arc<V>>> {
        self.value.write().unwrap_or_else(|e| e.into_inner())
    }

    fn children_read(&self) -> RwLockReadGuard<'_, Children<V>> {
        self.children.read().unwrap_or_else(|e| e.into_inner())
    }

    fn children_write(&self) -> RwLockWriteGuard<'_, Children<V>> {
        self.children.write().unwrap_or_else(|e| e.into_inner())
    }
}

enum Step<V> {
    Static(Arc<Node<V>>),
    Param(Arc<Node<V>>),
    CatchAll(Arc<Node<V>>),
}

impl<V> Trie<V> {
    pub(crate) fn new() -> Trie<V> {
        Trie {
            root: Node::new(),
            pruning: AtomicBool::new(false),
        }
    }

    /// Register a value under a pattern. Fails on a kind collision at
    /// any level and on re-adding an equivalent pattern.
    pub(crate) fn insert(&self, segments: &[PatternSegment], value: V) -> Result<(), Error> {
        let mut value = Some(value);
        'retry: loop {
            let mut visited: Vec<Arc<Node<V>>> = Vec::with_capacity(segments.len() + 1);
            self.root.reserved.fetch_add(1, Ordering::AcqRel);
            visited.push(Arc::clone(&self.root));

            let mut node = Arc::clone(&self.root);
            for seg in segments {
                let next = {
                    let mut children = node.children_write();
                    if node.pruned.load(Ordering::Acquire) {
                        None
                    } else {
                        match Self::descend_or_create(&mut children, seg) {
                            Ok(child) => {
                                // reserved under the parent's lock, so a
                                // prune cannot remove it in between
                                child.reserved.fetch_add(1, Ordering::AcqRel);
                                Some(child)
                            }
                            Err(e) => {
                                drop(children);
                                Self::release(&visited);
                                return Err(e);
                            }
                        }
                    }
                };
                match next {
                    Some(child) => {
                        visited.push(Arc::clone(&child));
                        node = child;
                    }
                    None => {
                        // stale branch; a prune got here first
                        Self::release(&visited);
                        continue 'retry;
                    }
                }
            }

            let result = {
                let mut slot = node.value_write();
                if slot.is_some() {
                    Err(Error::new_user(User::DuplicatePattern))
                } else {
                    *slot = Some(Arc::new(value.take().expect("value consumed once")));
                    Ok(())
                }
            };
            Self::release(&visited);
            return result;
        }
    }

    fn descend_or_create(
        children: &mut Children<V>,
        seg: &PatternSegment,
    ) -> Result<Arc<Node<V>>, Error> {
        match (&mut *children, seg) {
            (Children::Empty, PatternSegment::Static(lit)) => {
                let node = Node::new();
                let mut map = HashMap::new();
                map.insert(lit.clone(), Arc::clone(&node));
                *children = Children::Statics(map);
                Ok(node)
            }
            (Children::Empty, PatternSegment::Param(_)) => {
                let node = Node::new();
                *children = Children::Param(Arc::clone(&node));
                Ok(node)
            }
            (Children::Empty, PatternSegment::CatchAll(_)) => {
                let node = Node::new();
                *children = Children::CatchAll(Arc::clone(&node));
                Ok(node)
            }
            (Children::Statics(map), PatternSegment::Static(lit)) => Ok(Arc::clone(
                map.entry(lit.clone()).or_insert_with(|| Node::new()),
            )),
            (Children::Param(node), PatternSegment::Param(_)) => Ok(Arc::clone(node)),
            (Children::CatchAll(node), PatternSegment::CatchAll(_)) => Ok(Arc::clone(node)),
            _ => Err(Error::new_user(User::RouteCollision)),
        }
    }

    fn release(visited: &[Arc<Node<V>>]) {
        for node in visited {
            node.reserved.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Greedy lookup: static first, then param, then (terminally) the
    /// catch-all; a miss deeper down does not backtrack across kinds.
    pub(crate) fn lookup(&self, raw: &[String], decoded: &[String]) -> Option<TrieMatch<V>> {
        debug_assert_eq!(raw.len(), decoded.len());
        let mut node = Arc::clone(&self.root);
        let mut params = Vec::new();

        for i in 0..decoded.len() {
            let step = {
                let children = node.children_read();
                match &*children {
                    Children::Statics(map) => map.get(&decoded[i]).cloned().map(Step::Static),
                    Children::Param(child) => Some(Step::Param(Arc::clone(child))),
                    Children::CatchAll(child) => Some(Step::CatchAll(Arc::clone(child))),
                    Children::Empty => None,
                }
            };
            match step? {
                Step::Static(child) => node = child,
                Step::Param(child) => {
                    params.push((raw[i].clone(), decoded[i].clone()));
                    node = child;
                }
                Step::CatchAll(child) => {
                    let value = child.value_read().clone()?;
                    return Some(TrieMatch {
                        value,
                        params,
                        catch_all: Some((join_remainder(&raw[i..]), join_remainder(&decoded[i..]))),
                    });
                }
            }
        }

        if let Some(value) = node.value_read().clone() {
            return Some(TrieMatch {
                value,
                params,
                catch_all: None,
            });
        }
        // a catch-all also matches an empty remainder
        let children = node.children_read();
        if let Children::CatchAll(child) = &*children {
            let value = child.value_read().clone()?;
            return Some(TrieMatch {
                value,
                params,
                catch_all: Some(("/".to_owned(), "/".to_owned())),
            });
        }
        None
    }

    /// Clear the value at a pattern and prune the emptied branch.
    pub(crate) fn remove(&self, segments: &[PatternSegment]) -> Result<Arc<V>, Error> {
        let mut node = Arc::clone(&self.root);
        for seg in segments {
            let next = {
                let children = node.children_read();
                match (&*children, seg) {
                    (Children::Statics(map), PatternSegment::Static(lit)) => map.get(lit).cloned(),
                    (Children::Param(child), PatternSegment::Param(_)) => {
                        Some(Arc::clone(child))
                    }
                    (Children::CatchAll(child), PatternSegment::CatchAll(_)) => {
                        Some(Arc::clone(child))
                    }
                    _ => None,
                }
            };
            node = next.ok_or_else(|| Error::new_user(User::RouteNotRegistered))?;
        }
        let removed = node
            .value_write()
            .take()
            .ok_or_else(|| Error::new_user(User::RouteNotRegistered))?;
        self.prune();
        Ok(removed)
    }

    /// Depth-first removal of valueless, childless, unreserved nodes.
    /// One prune runs at a time.
    fn prune(&self) {
        if self
            .pruning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        Self::prune_node(&self.root);
        self.pruning.store(false, Ordering::Release);
    }

    fn prune_node(node: &Arc<Node<V>>) {
        let mut children = node.children_write();
        match &mut *children {
            Children::Empty => {}
            Children::Statics(map) => {
                map.retain(|_, child| {
                    Self::prune_node(child);
                    if Self::removable(child) {
                        child.pruned.store(true, Ordering::Release);
                        false
                    } else {
                        true
                    }
                });
                if map.is_empty() {
                    *children = Children::Empty;
                }
            }
            Children::Param(child) | Children::CatchAll(child) => {
                Self::prune_node(child);
                if Self::removable(child) {
                    child.pruned.store(true, Ordering::Release);
                    *children = Children::Empty;
                }
            }
        }
    }

    fn removable(node: &Arc<Node<V>>) -> bool {
        node.reserved.load(Ordering::Acquire) == 0
            && node.value_read().is_none()
            && matches!(&*node.children_read(), Children::Empty)
    }
}

impl<V> std::fmt::Debug for Trie<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Trie")
    }
}

fn join_remainder(segments: &[String]) -> String {
    let mut out = String::new();
    for seg in segments {
        out.push('/');
        out.push_str(seg);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_owned()).collect()
    }

    fn insert(trie: &Trie<&'static str>, pattern: &str, value: &'static str) -> Result<(), Error> {
        trie.insert(&parse_pattern(pattern).unwrap(), value)
    }

    fn lookup<'t>(trie: &'t Trie<&'static str>, parts: &[&str]) -> Option<TrieMatch<&'static str>> {
        let s = segs(parts);
        trie.lookup(&s, &s)
    }

    #[test]
    fn pattern_syntax() {
        assert!(parse_pattern("/").unwrap().is_empty());
        assert_eq!(parse_pattern("/a/:b/*c").unwrap().len(), 3);
        assert!(parse_pattern("no-slash").is_err());
        assert!(parse_pattern("/a//b").is_err());
        assert!(parse_pattern("/:").is_err());
        assert!(parse_pattern("/*").is_err());
        assert!(parse_pattern("/*rest/more").is_err());
    }

    #[test]
    fn static_and_param_lookup() {
        let trie = Trie::new();
        insert(&trie, "/hello", "hello").unwrap();
        insert(&trie, "/greet/:name", "greet").unwrap();

        let m = lookup(&trie, &["hello"]).unwrap();
        assert_eq!(*m.value, "hello");
        assert!(m.params.is_empty());

        let m = lookup(&trie, &["greet", "John"]).unwrap();
        assert_eq!(*m.value, "greet");
        assert_eq!(m.params, vec![("John".to_owned(), "John".to_owned())]);

        assert!(lookup(&trie, &["nope"]).is_none());
        assert!(lookup(&trie, &["greet"]).is_none());
        assert!(lookup(&trie, &["greet", "John", "extra"]).is_none());
    }

    #[test]
    fn root_pattern() {
        let trie = Trie::new();
        insert(&trie, "/", "root").unwrap();
        assert_eq!(*lookup(&trie, &[]).unwrap().value, "root");
    }

    #[test]
    fn catch_all_binds_remainder() {
        let trie = Trie::new();
        insert(&trie, "/files/*rest", "files").unwrap();

        let m = lookup(&trie, &["files", "a", "b"]).unwrap();
        assert_eq!(m.catch_all.as_ref().unwrap().1, "/a/b");

        // empty remainder defaults to "/"
        let m = lookup(&trie, &["files"]).unwrap();
        assert_eq!(m.catch_all.as_ref().unwrap().1, "/");
    }

    #[test]
    fn kinds_are_mutually_exclusive_per_level() {
        let trie = Trie::new();
        insert(&trie, "/user/:id", "param").unwrap();
        let err = insert(&trie, "/user/list", "static").unwrap_err();
        assert!(err.is_user());

        let trie = Trie::new();
        insert(&trie, "/user/list", "static").unwrap();
        assert!(insert(&trie, "/user/:id", "param").is_err());
        assert!(insert(&trie, "/user/*rest", "catch").is_err());
    }

    #[test]
    fn equivalent_pattern_is_rejected() {
        let trie = Trie::new();
        insert(&trie, "/a/:x", "one").unwrap();
        // equivalence ignores parameter names
        assert!(insert(&trie, "/a/:y", "two").is_err());
        assert!(insert(&trie, "/a/:x", "three").is_err());
    }

    #[test]
    fn remove_then_reuse_differently() {
        let trie = Trie::new();
        insert(&trie, "/user/:id", "param").unwrap();
        trie.remove(&parse_pattern("/user/:id").unwrap()).unwrap();
        // the emptied branch was pruned, so the level is free again
        insert(&trie, "/user/list", "static").unwrap();
        assert_eq!(*lookup(&trie, &["user", "list"]).unwrap().value, "static");
    }

    #[test]
    fn remove_unknown_fails() {
        let trie: Trie<&'static str> = Trie::new();
        assert!(trie.remove(&parse_pattern("/missing").unwrap()).is_err());
    }

    #[test]
    fn prune_keeps_branches_with_values() {
        let trie = Trie::new();
        insert(&trie, "/a/b/c", "deep").unwrap();
        insert(&trie, "/a/b", "shallow").unwrap();
        trie.remove(&parse_pattern("/a/b/c").unwrap()).unwrap();
        assert_eq!(*lookup(&trie, &["a", "b"]).unwrap().value, "shallow");
        assert!(lookup(&trie, &["a", "b", "c"]).is_none());
    }

    #[test]
    fn concurrent_writers_do_not_lose_routes() {
        use std::thread;

        let trie: Arc<Trie<String>> = Arc::new(Trie::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let trie = Arc::clone(&trie);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    let pattern = format!("/t{}/r{}", t, i);
                    let segs = parse_pattern(&pattern).unwrap();
                    trie.insert(&segs, pattern.clone()).unwrap();
                    if i % 2 == 0 {
                        trie.remove(&segs).unwrap();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for t in 0..4 {
            for i in (1..50).step_by(2) {
                let parts = vec![format!("t{}", t), format!("r{}", i)];
                assert!(trie.lookup(&parts, &parts).is_some(), "lost /t{}/r{}", t, i);
            }
        }
    }
}
