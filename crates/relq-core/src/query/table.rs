//! Table bindings: every table participating in a statement.

use relq_expr::JoinKind;

use super::field::ResultField;

/// Index of a binding in the statement's arena.
pub type TableId = usize;

/// One table participating in a statement.
///
/// Bindings live in a per-statement arena and are addressed by index; they
/// are appended as clauses register tables and are never removed within a
/// statement, so indices stay stable. A binding can stand for a physical
/// table, an inline sub-query (`body` set), or a pending one-to-many
/// include target (`include` set, excluded from the FROM clause).
#[derive(Debug, Clone)]
pub struct TableBinding {
    /// Entity name this binding maps.
    pub entity: String,
    /// Physical table name.
    pub table: String,
    /// Assigned alias. Emitted only while aliasing is active.
    pub alias: String,
    /// Dotted navigation path from the statement root, used for lookup.
    pub path: String,
    /// Join kind, for bindings introduced by a join.
    pub join: Option<JoinKind>,
    /// Rendered ON predicate, for joined bindings.
    pub on_sql: Option<String>,
    /// Rendered inline sub-query text, when this binding wraps one.
    pub body: Option<String>,
    /// Known result fields, for sub-query bindings and projection reuse.
    pub fields: Vec<ResultField>,
    /// True when this binding participates in the FROM clause.
    pub in_from: bool,
    /// True for pending one-to-many include targets.
    pub include: bool,
    /// True once the query observably touches this binding.
    pub used: bool,
    /// Owning binding for navigation targets.
    pub parent: Option<TableId>,
}

impl TableBinding {
    /// A root FROM binding.
    pub fn root(entity: impl Into<String>, table: impl Into<String>, alias: String, path: String) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            alias,
            path,
            join: None,
            on_sql: None,
            body: None,
            fields: Vec::new(),
            in_from: true,
            include: false,
            used: false,
            parent: None,
        }
    }

    /// A joined binding. The ON text is rendered later, by the caller.
    pub fn joined(
        entity: impl Into<String>,
        table: impl Into<String>,
        alias: String,
        path: String,
        kind: JoinKind,
        parent: Option<TableId>,
    ) -> Self {
        Self {
            join: Some(kind),
            parent,
            ..Self::root(entity, table, alias, path)
        }
    }

    /// A pending one-to-many include target, kept out of the FROM clause.
    pub fn pending_include(
        entity: impl Into<String>,
        table: impl Into<String>,
        alias: String,
        path: String,
        parent: TableId,
    ) -> Self {
        Self {
            in_from: false,
            include: true,
            parent: Some(parent),
            ..Self::root(entity, table, alias, path)
        }
    }

    /// FROM-clause source text, before aliasing.
    pub fn source(&self) -> &str {
        self.body.as_deref().unwrap_or(&self.table)
    }
}

/// Alias for the `index`-th binding of a statement.
///
/// Single letters run from the configured start to `z`; beyond that the
/// sequence falls back to `t{index}`.
pub fn alias_at(start: char, index: usize) -> String {
    let base = start as u32;
    let candidate = base + index as u32;
    if candidate <= 'z' as u32 {
        char::from_u32(candidate)
            .map(String::from)
            .unwrap_or_else(|| format!("t{index}"))
    } else {
        format!("t{index}")
    }
}
