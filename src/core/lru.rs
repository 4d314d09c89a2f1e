use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::store::Table;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    prev: Option<String>,
    next: Option<String>,
}

/// A doubly-linked list keyed by URL, stored as a flat map of
/// key-to-neighbor-keys rather than a pointer graph, so the entire
/// state is trivially JSON-serializable. `head` is the most recently
/// used entry, `tail` the least.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LruState {
    head: Option<String>,
    tail: Option<String>,
    map: HashMap<String, Node>,
    count: usize,
}

impl LruState {
    /// Moves `url` to the head, inserting it if new. Re-insertion of
    /// the current head is a no-op.
    pub fn accessed(&mut self, url: &str) {
        if self.head.as_deref() == Some(url) {
            return;
        }
        if self.map.contains_key(url) {
            self.unlink(url);
        } else {
            self.count += 1;
        }
        self.push_front(url);
    }

    /// Removes and returns the tail URL, or `None` if empty.
    pub fn pop(&mut self) -> Option<String> {
        let tail = self.tail.clone()?;
        self.remove(&tail);
        Some(tail)
    }

    /// Unlinks `url`; returns whether it was present.
    pub fn remove(&mut self, url: &str) -> bool {
        if !self.map.contains_key(url) {
            return false;
        }
        self.unlink(url);
        self.map.remove(url);
        self.count -= 1;
        if self.count == 0 {
            self.head = None;
            self.tail = None;
        }
        true
    }

    pub fn size(&self) -> usize {
        self.count
    }

    pub fn contains(&self, url: &str) -> bool {
        self.map.contains_key(url)
    }

    /// Enumerates head-to-tail, for tests and invariant checks.
    pub fn iter_forward(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.count);
        let mut cur = self.head.clone();
        while let Some(url) = cur {
            cur = self.map.get(&url).and_then(|n| n.next.clone());
            out.push(url);
        }
        out
    }

    fn unlink(&mut self, url: &str) {
        let (prev, next) = {
            let node = self.map.get(url).expect("unlink of absent node");
            (node.prev.clone(), node.next.clone())
        };
        match &prev {
            Some(p) => self.map.get_mut(p).unwrap().next = next.clone(),
            None => self.head = next.clone(),
        }
        match &next {
            Some(n) => self.map.get_mut(n).unwrap().prev = prev.clone(),
            None => self.tail = prev.clone(),
        }
    }

    fn push_front(&mut self, url: &str) {
        let old_head = self.head.clone();
        self.map.insert(
            url.to_string(),
            Node {
                prev: None,
                next: old_head.clone(),
            },
        );
        if let Some(h) = &old_head {
            self.map.get_mut(h).unwrap().prev = Some(url.to_string());
        }
        self.head = Some(url.to_string());
        if self.tail.is_none() {
            self.tail = Some(url.to_string());
        }
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.count, self.map.len());
        if let Some(h) = &self.head {
            assert!(self.map.get(h).unwrap().prev.is_none());
        }
        if let Some(t) = &self.tail {
            assert!(self.map.get(t).unwrap().next.is_none());
        }
        let forward = self.iter_forward();
        assert_eq!(forward.len(), self.count);
        let mut backward = Vec::new();
        let mut cur = self.tail.clone();
        while let Some(url) = cur {
            cur = self.map.get(&url).and_then(|n| n.prev.clone());
            backward.push(url);
        }
        backward.reverse();
        assert_eq!(forward, backward);
    }
}

/// [`LruState`] bound to its persisted `"lru"` key in a data group's
/// table. Mutations are in-memory; callers call [`Lru::persist`] at the
/// sync points the design doc names (after every cache-mutating
/// operation).
pub struct Lru {
    pub state: LruState,
    table: Table,
}

impl Lru {
    pub async fn load(table: Table) -> Result<Self, Error> {
        let state = match table.read::<LruState>("lru").await {
            Ok(s) => s,
            Err(Error::NotFound(_)) => LruState::default(),
            Err(e) => return Err(e),
        };
        Ok(Self { state, table })
    }

    pub async fn persist(&self) -> Result<(), Error> {
        self.table.write("lru", &self.state).await
    }
}
