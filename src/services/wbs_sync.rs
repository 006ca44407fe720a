//! Planning of the sale line to work breakdown structure synchronization.
//!
//! [`plan`] walks the line forest of a sale and the WBS forest already
//! associated with it in lockstep and returns the mutations needed to
//! mirror the lines into WBS nodes. It performs no I/O; the WBS service
//! applies the plan inside the caller's transaction.
//!
//! Rules, per line, top-down:
//! * a line without a node reuses the node of the same description at the
//!   current level, or gets a new node created under the current context;
//! * a line with a node whose parent is not the current context has that
//!   node moved under the context (the root level for top-level lines);
//! * the children of the line are then walked with the line's node as the
//!   context.
//!
//! Nodes planned earlier in the same pass are visible to the description
//! lookup, so two sibling lines sharing a description end up on one node.

use std::collections::HashMap;

use tracing::debug;

use crate::entities::{sale_line, wbs, LineType};
use crate::errors::ServiceError;
use crate::services::tree::Forest;

/// A WBS node that either exists already or is created by an earlier
/// mutation of the same plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WbsRef {
    Existing(i64),
    Planned(usize),
}

/// Field values of a node to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWbs {
    pub description: String,
    pub node_type: LineType,
    pub product_id: Option<i64>,
    pub unit_id: Option<i64>,
    pub sequence: Option<i32>,
    pub parent: Option<WbsRef>,
}

impl NewWbs {
    /// Node mirroring `line`, placed under `parent`.
    pub fn from_line(line: &sale_line::Model, parent: Option<WbsRef>) -> Self {
        Self {
            description: line.description.clone(),
            node_type: line.line_type,
            product_id: line.product_id,
            unit_id: line.unit_id,
            sequence: line.sequence,
            parent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WbsMutation {
    /// Create a node; later mutations refer to it as `WbsRef::Planned(slot)`.
    Create {
        slot: usize,
        line_id: i64,
        node: NewWbs,
    },
    /// Attach a line to a node.
    Link { line_id: i64, wbs: WbsRef },
    /// Move an existing node under another parent.
    Reparent {
        wbs_id: i64,
        parent: Option<WbsRef>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub mutations: Vec<WbsMutation>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn creations(&self) -> usize {
        self.mutations
            .iter()
            .filter(|m| matches!(m, WbsMutation::Create { .. }))
            .count()
    }
}

struct Planner<'a> {
    lines: &'a Forest<sale_line::Model>,
    descriptions: HashMap<WbsRef, String>,
    parent_of: HashMap<WbsRef, Option<WbsRef>>,
    children_of: HashMap<Option<WbsRef>, Vec<WbsRef>>,
    next_slot: usize,
    mutations: Vec<WbsMutation>,
}

impl<'a> Planner<'a> {
    fn new(lines: &'a Forest<sale_line::Model>, nodes: &Forest<wbs::Model>) -> Self {
        let mut descriptions = HashMap::new();
        let mut parent_of = HashMap::new();
        let mut children_of: HashMap<Option<WbsRef>, Vec<WbsRef>> = HashMap::new();

        for node in nodes.iter() {
            let key = WbsRef::Existing(node.id);
            let parent = nodes.parent(node.id).map(|p| WbsRef::Existing(p.id));
            descriptions.insert(key, node.description.clone());
            parent_of.insert(key, parent);
        }
        // Forest::iter is in sibling order, so the level lists are too.
        for node in nodes.iter() {
            let key = WbsRef::Existing(node.id);
            children_of.entry(parent_of[&key]).or_default().push(key);
        }

        Self {
            lines,
            descriptions,
            parent_of,
            children_of,
            next_slot: 0,
            mutations: Vec::new(),
        }
    }

    fn find_at_level(&self, context: Option<WbsRef>, description: &str) -> Option<WbsRef> {
        self.children_of
            .get(&context)?
            .iter()
            .rev()
            .find(|r| self.descriptions.get(r).map(String::as_str) == Some(description))
            .copied()
    }

    fn is_ancestor_or_self(&self, candidate: WbsRef, mut of: Option<WbsRef>) -> bool {
        let mut steps = 0;
        while let Some(current) = of {
            if current == candidate {
                return true;
            }
            steps += 1;
            if steps > self.parent_of.len() {
                return true;
            }
            of = self.parent_of.get(&current).copied().flatten();
        }
        false
    }

    fn move_node(&mut self, node: WbsRef, parent: Option<WbsRef>) {
        if let Some(old) = self.parent_of.insert(node, parent) {
            if let Some(siblings) = self.children_of.get_mut(&old) {
                siblings.retain(|r| *r != node);
            }
        }
        self.children_of.entry(parent).or_default().push(node);
    }

    fn walk(
        &mut self,
        level: Vec<&'a sale_line::Model>,
        context: Option<WbsRef>,
    ) -> Result<(), ServiceError> {
        for line in level {
            let resolved = match line.wbs_id {
                None => {
                    let target = match self.find_at_level(context, &line.description) {
                        Some(found) => found,
                        None => {
                            let slot = self.next_slot;
                            self.next_slot += 1;
                            let planned = WbsRef::Planned(slot);
                            self.descriptions
                                .insert(planned, line.description.clone());
                            self.move_node(planned, context);
                            self.mutations.push(WbsMutation::Create {
                                slot,
                                line_id: line.id,
                                node: NewWbs::from_line(line, context),
                            });
                            planned
                        }
                    };
                    self.mutations.push(WbsMutation::Link {
                        line_id: line.id,
                        wbs: target,
                    });
                    target
                }
                Some(wbs_id) => {
                    let current = WbsRef::Existing(wbs_id);
                    let current_parent = self.parent_of.get(&current).copied().flatten();
                    if current_parent != context {
                        if self.is_ancestor_or_self(current, context) {
                            return Err(ServiceError::ValidationError(format!(
                                "moving WBS {} under line {}'s chapter would create a cycle",
                                wbs_id, line.id
                            )));
                        }
                        debug!(wbs_id, line_id = line.id, "planning WBS reparent");
                        self.move_node(current, context);
                        self.mutations.push(WbsMutation::Reparent {
                            wbs_id,
                            parent: context,
                        });
                    }
                    current
                }
            };

            let children: Vec<&'a sale_line::Model> = self.lines.children(line.id).collect();
            if !children.is_empty() {
                self.walk(children, Some(resolved))?;
            }
        }
        Ok(())
    }
}

/// Computes the mutations that mirror `lines` into `nodes`.
///
/// `nodes` must hold every node currently linked to one of `lines`
/// together with its ancestors and descendants; nodes outside it are
/// assumed to sit at the root level.
pub fn plan(
    lines: &Forest<sale_line::Model>,
    nodes: &Forest<wbs::Model>,
) -> Result<SyncPlan, ServiceError> {
    let mut planner = Planner::new(lines, nodes);
    planner.walk(lines.roots().collect(), None)?;
    Ok(SyncPlan {
        mutations: planner.mutations,
    })
}
