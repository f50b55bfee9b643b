//! Arena-backed `Category` / `Thing` / `Connection` model (spec.md §3, §9).
//!
//! The source this crate's behavior is grounded on represents a parsed file
//! as a web of mutually-referencing Category and Thing objects. Rust has no
//! cheap way to let two heap objects hold live references to each other, so
//! both live in one arena and refer to each other by stable integer id —
//! `member_things`/`categories` become id lookups instead of owned cycles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type ThingId = usize;
pub type CategoryId = usize;

/// Abstract grouping a [`Thing`] can belong to. This is the "classification"
/// surfaced on [`crate::types::SemanticMetadata`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategoryName {
    Declaration,
    Definition,
    ControlFlow,
    DataStructure,
    Documentation,
    Import,
    Expression,
    #[default]
    Unknown,
}

/// A concrete AST element. Leaves are [`Thing::Token`]; everything with
/// children is [`Thing::CompositeThing`].
#[derive(Debug, Clone)]
pub enum Thing {
    Token,
    CompositeThing { children: Vec<ThingId> },
}

impl Thing {
    pub fn is_composite(&self) -> bool {
        matches!(self, Thing::CompositeThing { .. })
    }
}

/// The role a [`Connection::Direct`] edge carries; unused for
/// [`Connection::Positional`] edges, which are ordered but unnamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Name,
    Body,
    Parameter,
    Condition,
    Target,
    Parent,
    Generic,
}

/// An edge between two [`Thing`]s.
#[derive(Debug, Clone, Copy)]
pub enum Connection {
    Direct {
        from: ThingId,
        to: ThingId,
        role: Role,
    },
    Positional {
        from: ThingId,
        to: ThingId,
        order: usize,
    },
}

/// A [`Thing`] node plus the bookkeeping the arena needs: its byte range in
/// source, the raw tree-sitter node kind, the categories it belongs to, and
/// its parent (if any) — all by id, never by owned reference.
#[derive(Debug, Clone)]
pub struct ThingRecord {
    pub thing: Thing,
    pub node_kind: String,
    pub start_byte: usize,
    pub end_byte: usize,
    pub parent: Option<ThingId>,
    pub category_ids: Vec<CategoryId>,
}

#[derive(Debug, Clone)]
struct CategoryRecord {
    name: CategoryName,
    member_things: Vec<ThingId>,
}

/// Stable-name-keyed arena of Things, Categories, and the Connections
/// between Things.
#[derive(Debug, Clone, Default)]
pub struct ThingArena {
    things: Vec<ThingRecord>,
    categories: Vec<CategoryRecord>,
    category_ids: HashMap<CategoryName, CategoryId>,
    connections: Vec<Connection>,
}

impl ThingArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn category_id(&mut self, name: CategoryName) -> CategoryId {
        if let Some(&id) = self.category_ids.get(&name) {
            return id;
        }
        let id = self.categories.len();
        self.categories.push(CategoryRecord {
            name,
            member_things: Vec::new(),
        });
        self.category_ids.insert(name, id);
        id
    }

    /// Inserts a Thing, tagging it with zero or more Categories.
    pub fn insert(
        &mut self,
        thing: Thing,
        node_kind: impl Into<String>,
        start_byte: usize,
        end_byte: usize,
        parent: Option<ThingId>,
        categories: &[CategoryName],
    ) -> ThingId {
        let id = self.things.len();
        let category_ids: Vec<CategoryId> =
            categories.iter().map(|&c| self.category_id(c)).collect();
        for &cid in &category_ids {
            self.categories[cid].member_things.push(id);
        }
        self.things.push(ThingRecord {
            thing,
            node_kind: node_kind.into(),
            start_byte,
            end_byte,
            parent,
            category_ids,
        });
        id
    }

    pub fn connect_direct(&mut self, from: ThingId, to: ThingId, role: Role) {
        self.connections.push(Connection::Direct { from, to, role });
    }

    pub fn connect_positional(&mut self, from: ThingId, to: ThingId, order: usize) {
        self.connections
            .push(Connection::Positional { from, to, order });
    }

    pub fn get(&self, id: ThingId) -> Option<&ThingRecord> {
        self.things.get(id)
    }

    pub fn member_things(&self, category: CategoryName) -> &[ThingId] {
        self.category_ids
            .get(&category)
            .and_then(|&id| self.categories.get(id))
            .map(|record| record.member_things.as_slice())
            .unwrap_or(&[])
    }

    pub fn primary_category(&self, id: ThingId) -> CategoryName {
        self.get(id)
            .and_then(|record| record.category_ids.first())
            .and_then(|&cid| self.categories.get(cid))
            .map(|record| record.name)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.things.len()
    }

    pub fn is_empty(&self) -> bool {
        self.things.is_empty()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }
}

/// Summary of a Thing attached to a chunk's metadata when an oversize
/// semantic node delegates to the delimiter chunker (spec.md §4.3 step 4).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingKind {
    pub node_kind: String,
    pub classification: CategoryName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_things_round_trips_through_category_lookup() {
        let mut arena = ThingArena::new();
        let func = arena.insert(Thing::Token, "function_item", 0, 10, None, &[CategoryName::Definition]);
        let other = arena.insert(Thing::Token, "struct_item", 11, 20, None, &[CategoryName::DataStructure]);

        assert_eq!(arena.member_things(CategoryName::Definition), &[func]);
        assert_eq!(arena.member_things(CategoryName::DataStructure), &[other]);
        assert!(arena.member_things(CategoryName::ControlFlow).is_empty());
    }

    #[test]
    fn composite_things_reference_children_by_id_not_ownership() {
        let mut arena = ThingArena::new();
        let child = arena.insert(Thing::Token, "identifier", 0, 3, None, &[]);
        let parent = arena.insert(
            Thing::CompositeThing { children: vec![child] },
            "function_item",
            0,
            10,
            None,
            &[CategoryName::Definition],
        );
        arena.connect_direct(parent, child, Role::Name);

        assert!(arena.get(parent).unwrap().thing.is_composite());
        assert_eq!(arena.connections().len(), 1);
    }

    #[test]
    fn primary_category_defaults_to_unknown() {
        let mut arena = ThingArena::new();
        let id = arena.insert(Thing::Token, "comment", 0, 1, None, &[]);
        assert_eq!(arena.primary_category(id), CategoryName::Unknown);
    }
}
