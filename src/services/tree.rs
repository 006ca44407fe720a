//! In-memory arena for the adjacency-list hierarchies stored in the
//! database (sale lines and work breakdown structure nodes).
//!
//! Records are loaded flat and linked through their `parent_id`. Siblings
//! are ordered by `sequence` ascending with missing sequences last, then by
//! id. A record whose parent is not part of the loaded set is treated as a
//! root.

use std::collections::HashMap;

use crate::entities::{sale_line, wbs};

/// A record that participates in a parent/child hierarchy.
pub trait TreeRecord {
    fn id(&self) -> i64;
    fn parent_id(&self) -> Option<i64>;
    fn sequence(&self) -> Option<i32>;
}

impl TreeRecord for sale_line::Model {
    fn id(&self) -> i64 {
        self.id
    }

    fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }

    fn sequence(&self) -> Option<i32> {
        self.sequence
    }
}

impl TreeRecord for wbs::Model {
    fn id(&self) -> i64 {
        self.id
    }

    fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }

    fn sequence(&self) -> Option<i32> {
        self.sequence
    }
}

/// Sort key for siblings: nulls last, then sequence, then id.
pub fn sibling_order(sequence: Option<i32>, id: i64) -> (bool, i32, i64) {
    (sequence.is_none(), sequence.unwrap_or_default(), id)
}

#[derive(Debug, Clone)]
pub struct Forest<T> {
    nodes: Vec<T>,
    index: HashMap<i64, usize>,
    children: Vec<Vec<usize>>,
    parents: Vec<Option<usize>>,
    roots: Vec<usize>,
}

impl<T: TreeRecord> Forest<T> {
    pub fn new(mut records: Vec<T>) -> Self {
        records.sort_by_key(|r| sibling_order(r.sequence(), r.id()));
        records.dedup_by_key(|r| r.id());

        let index: HashMap<i64, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id(), i))
            .collect();

        let mut children = vec![Vec::new(); records.len()];
        let mut parents = vec![None; records.len()];
        let mut roots = Vec::new();

        // Records are already sorted, so pushing in order keeps siblings sorted.
        for (i, record) in records.iter().enumerate() {
            match record.parent_id().and_then(|p| index.get(&p).copied()) {
                Some(p) if p != i => {
                    children[p].push(i);
                    parents[i] = Some(p);
                }
                _ => roots.push(i),
            }
        }

        Self {
            nodes: records,
            index,
            children,
            parents,
            roots,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&T> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn roots(&self) -> impl Iterator<Item = &T> + '_ {
        self.roots.iter().map(move |&i| &self.nodes[i])
    }

    /// Children of `id` in sibling order; empty when `id` is unknown.
    pub fn children(&self, id: i64) -> impl Iterator<Item = &T> + '_ {
        self.index
            .get(&id)
            .map(|&i| self.children[i].as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&c| &self.nodes[c])
    }

    pub fn has_children(&self, id: i64) -> bool {
        self.index
            .get(&id)
            .map(|&i| !self.children[i].is_empty())
            .unwrap_or(false)
    }

    /// Loaded parent of `id`, if any.
    pub fn parent(&self, id: i64) -> Option<&T> {
        let i = *self.index.get(&id)?;
        self.parents[i].map(|p| &self.nodes[p])
    }

    /// Every record in sibling order, ignoring the hierarchy.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.nodes.iter()
    }

    /// Records reachable from the roots, depth first.
    pub fn preorder(&self) -> Vec<&T> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(i) = stack.pop() {
            out.push(&self.nodes[i]);
            stack.extend(self.children[i].iter().rev().copied());
        }
        out
    }

    /// Dotted 1-based position of every reachable record among its
    /// siblings: roots get "1", "2", ...; children of "1" get "1.1", ...
    pub fn chapter_numbers(&self) -> HashMap<i64, String> {
        self.number_from(&self.roots)
    }

    /// Like [`Forest::chapter_numbers`], numbering the top level in the
    /// order of `top_level` instead of sibling order. Unknown ids are skipped.
    pub fn chapter_numbers_from(&self, top_level: &[i64]) -> HashMap<i64, String> {
        let tops: Vec<usize> = top_level
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .collect();
        self.number_from(&tops)
    }

    fn number_from(&self, tops: &[usize]) -> HashMap<i64, String> {
        let mut numbers = HashMap::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, String)> = tops
            .iter()
            .enumerate()
            .rev()
            .map(|(pos, &i)| (i, (pos + 1).to_string()))
            .collect();

        while let Some((i, label)) = stack.pop() {
            for (pos, &c) in self.children[i].iter().enumerate().rev() {
                stack.push((c, format!("{}.{}", label, pos + 1)));
            }
            numbers.insert(self.nodes[i].id(), label);
        }
        numbers
    }
}
