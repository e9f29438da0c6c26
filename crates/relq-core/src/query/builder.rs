//! The query assembler: fluent clause recording and SELECT rendering.
//!
//! A [`QueryBuilder`] compiles one statement. Clauses render as they
//! arrive, so tables must be registered (from/join/include) before the
//! filters and projections that reference them. `build` renders once;
//! after that only the include helpers remain usable.

use relq_expr::{BinaryOp, Expr, JoinKind, QueryOp, Subquery};

use crate::error::{Error, Result};
use crate::row::{EntityRecord, RowCursor};
use crate::schema::Cardinality;

use super::field::{FieldKind, ResultField, ResultShape};
use super::include::{self, IncludeSegment, IncludeStatement};
use super::segment::SqlParam;
use super::table::{TableBinding, TableId};
use super::walker::{Clause, GroupField, QueryContext, SqlWalker};

/// A rendered statement: SQL text, bound parameters, and the projected
/// shape its rows materialize into.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    /// The statement text. Paginated builds carry two statements joined by
    /// `;`: the count query, then the page query.
    pub sql: String,
    /// Bound parameters in placeholder order.
    pub params: Vec<SqlParam>,
    /// Projected result shape.
    pub shape: ResultShape,
}

/// A sub-query rendered for embedding in an outer statement.
#[derive(Debug)]
pub(crate) struct InlineQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub fields: Vec<ResultField>,
    pub entity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuilderState {
    Empty,
    Assembling,
    Unioned,
    Rendered,
}

/// Assembles one SELECT statement from fluent clause calls.
#[derive(Debug)]
pub struct QueryBuilder {
    w: SqlWalker,
    state: BuilderState,
    select_fields: Option<Vec<ResultField>>,
    distinct: bool,
    where_sql: Option<String>,
    where_or: bool,
    group_sql: Option<String>,
    having_sql: Option<String>,
    having_or: bool,
    order_sql: Option<String>,
    skip: Option<u64>,
    take: Option<u64>,
    union_sql: Option<String>,
    union_fields: Vec<ResultField>,
    union_count: usize,
    includes: Vec<IncludeSegment>,
    last_include: Option<TableId>,
    shape: Option<ResultShape>,
}

impl QueryBuilder {
    /// Start a statement.
    pub fn new(ctx: QueryContext) -> Self {
        Self::with_walker(SqlWalker::new(ctx))
    }

    /// Start a nested statement whose parameters continue an outer
    /// statement's numbering.
    pub(crate) fn nested(ctx: QueryContext, param_prefix: String, param_base: usize) -> Self {
        Self::with_walker(SqlWalker::with_params(ctx, param_prefix, param_base))
    }

    fn with_walker(w: SqlWalker) -> Self {
        Self {
            w,
            state: BuilderState::Empty,
            select_fields: None,
            distinct: false,
            where_sql: None,
            where_or: false,
            group_sql: None,
            having_sql: None,
            having_or: false,
            order_sql: None,
            skip: None,
            take: None,
            union_sql: None,
            union_fields: Vec::new(),
            union_count: 0,
            includes: Vec::new(),
            last_include: None,
            shape: None,
        }
    }

    /// A new empty statement over the same context.
    pub fn fresh(&self) -> QueryBuilder {
        QueryBuilder::new(self.w.ctx.clone())
    }

    /// Gate for clause calls: forbids empty and rendered statements, and
    /// wraps a pending union into an inline sub-query.
    fn clause_gate(&mut self) -> Result<()> {
        match self.state {
            BuilderState::Rendered => Err(Error::invalid_state("statement already rendered")),
            BuilderState::Empty => Err(Error::invalid_state("no FROM table; call from() first")),
            BuilderState::Unioned => self.wrap_union(),
            BuilderState::Assembling => Ok(()),
        }
    }

    /// Register a root FROM table. Repeated calls append comma-separated
    /// roots; after a union, the union wraps first.
    pub fn from(mut self, entity: &str) -> Result<Self> {
        match self.state {
            BuilderState::Rendered => {
                return Err(Error::invalid_state("statement already rendered"))
            }
            BuilderState::Unioned => self.wrap_union()?,
            _ => {}
        }
        let schema = self.w.ctx.schema.clone();
        let map = schema.entity(entity)?;
        let alias = self.w.next_alias();
        let path = self.w.unique_path(entity);
        let id = self
            .w
            .add_binding(TableBinding::root(entity, map.table.clone(), alias, path));
        self.w.param_tables.push(id);
        self.state = BuilderState::Assembling;
        Ok(self)
    }

    /// Join another entity. The ON predicate sees every registered table.
    pub fn join(mut self, kind: JoinKind, entity: &str, on: &Expr) -> Result<Self> {
        self.clause_gate()?;
        let schema = self.w.ctx.schema.clone();
        let map = schema.entity(entity)?;
        let alias = self.w.next_alias();
        let path = self.w.unique_path(entity);
        let id = self.w.add_binding(TableBinding::joined(
            entity,
            map.table.clone(),
            alias,
            path,
            kind,
            None,
        ));
        self.w.param_tables.push(id);
        let previous = std::mem::replace(&mut self.w.clause, Clause::On);
        let on_sql = self.w.condition(on);
        self.w.clause = previous;
        self.w.tables[id].on_sql = Some(on_sql?);
        Ok(self)
    }

    /// `INNER JOIN` convenience.
    pub fn inner_join(self, entity: &str, on: &Expr) -> Result<Self> {
        self.join(JoinKind::Inner, entity, on)
    }

    /// `LEFT JOIN` convenience.
    pub fn left_join(self, entity: &str, on: &Expr) -> Result<Self> {
        self.join(JoinKind::Left, entity, on)
    }

    /// `RIGHT JOIN` convenience.
    pub fn right_join(self, entity: &str, on: &Expr) -> Result<Self> {
        self.join(JoinKind::Right, entity, on)
    }

    /// Join an inline sub-query. The sub-query renders immediately on a
    /// child assembler; its parameters merge into this statement and its
    /// projected fields become referenceable columns.
    pub fn join_subquery(mut self, kind: JoinKind, query: Subquery, on: &Expr) -> Result<Self> {
        self.clause_gate()?;
        let id = self.add_subquery_binding(&query, Some(kind))?;
        let previous = std::mem::replace(&mut self.w.clause, Clause::On);
        let on_sql = self.w.condition(on);
        self.w.clause = previous;
        self.w.tables[id].on_sql = Some(on_sql?);
        Ok(self)
    }

    /// Register a named sub-query as an additional FROM root.
    pub fn with_table(mut self, query: Subquery) -> Result<Self> {
        match self.state {
            BuilderState::Rendered => {
                return Err(Error::invalid_state("statement already rendered"))
            }
            BuilderState::Unioned => self.wrap_union()?,
            _ => {}
        }
        self.add_subquery_binding(&query, None)?;
        self.state = BuilderState::Assembling;
        Ok(self)
    }

    fn add_subquery_binding(&mut self, query: &Subquery, kind: Option<JoinKind>) -> Result<TableId> {
        let base = self.w.param_base + self.w.params.len();
        let child = QueryBuilder::nested(self.w.ctx.clone(), self.w.param_prefix.clone(), base);
        let inline = child.replay(query)?;
        self.w.params.extend(inline.params);
        let alias = self.w.next_alias();
        let id = self.w.tables.len();
        let path = self.w.unique_path(&inline.entity);
        let mut binding = match kind {
            Some(kind) => {
                TableBinding::joined(inline.entity.clone(), "", alias.clone(), path, kind, None)
            }
            None => TableBinding::root(inline.entity.clone(), "", alias.clone(), path),
        };
        binding.body = Some(format!("({})", inline.sql));
        binding.fields = retarget_fields(&inline.fields, &alias, id, &self.w);
        self.w.add_binding(binding);
        self.w.param_tables.push(id);
        Ok(id)
    }

    /// Add a WHERE predicate. Multiple calls conjoin; OR-rooted predicates
    /// parenthesize so the conjunction binds correctly.
    pub fn filter(mut self, predicate: &Expr) -> Result<Self> {
        self.clause_gate()?;
        self.w.clause = Clause::Where;
        let top_or = matches!(
            predicate,
            Expr::Binary {
                op: BinaryOp::Or,
                ..
            }
        );
        let text = self.w.condition(predicate)?;
        and_append(&mut self.where_sql, &mut self.where_or, text, top_or);
        Ok(self)
    }

    /// Add grouping keys: a member, or an object of named key expressions.
    pub fn group_by(mut self, keys: &Expr) -> Result<Self> {
        self.clause_gate()?;
        self.w.clause = Clause::GroupBy;
        let mut entries: Vec<(String, String)> = Vec::new();
        match keys {
            Expr::Object(members) => {
                for (name, expr) in members {
                    let mut seg = self.w.visit(expr)?;
                    self.w.render(&mut seg)?;
                    entries.push((name.clone(), seg.sql.unwrap_or_default()));
                }
            }
            Expr::Member { member, .. } => {
                let name = member.clone();
                let mut seg = self.w.visit(keys)?;
                self.w.render(&mut seg)?;
                entries.push((name, seg.sql.unwrap_or_default()));
            }
            _ => {
                return Err(Error::unsupported(
                    "group keys must be a member or an object of named expressions",
                ))
            }
        }
        for (member, sql) in entries {
            match &mut self.group_sql {
                Some(existing) => {
                    existing.push(',');
                    existing.push_str(&sql);
                }
                None => self.group_sql = Some(sql.clone()),
            }
            self.w.group_fields.push(GroupField { member, sql });
        }
        Ok(self)
    }

    /// Add a HAVING predicate. Aggregates are allowed here.
    pub fn having(mut self, predicate: &Expr) -> Result<Self> {
        self.clause_gate()?;
        self.w.clause = Clause::Having;
        let top_or = matches!(
            predicate,
            Expr::Binary {
                op: BinaryOp::Or,
                ..
            }
        );
        let text = self.w.condition(predicate)?;
        and_append(&mut self.having_sql, &mut self.having_or, text, top_or);
        Ok(self)
    }

    /// Add an ascending ORDER BY key.
    pub fn order_by(self, key: &Expr) -> Result<Self> {
        self.order_with(key, false)
    }

    /// Add a descending ORDER BY key.
    pub fn order_by_desc(self, key: &Expr) -> Result<Self> {
        self.order_with(key, true)
    }

    fn order_with(mut self, key: &Expr, descending: bool) -> Result<Self> {
        self.clause_gate()?;
        self.w.clause = Clause::OrderBy;
        let suffix = if descending { " DESC" } else { "" };
        let mut parts = Vec::new();
        if matches!(key, Expr::Grouping) {
            // Ordering by the grouping key orders by every key in turn.
            if self.w.group_fields.is_empty() {
                return Err(Error::unsupported(
                    "order_by(grouping) requires a preceding group_by",
                ));
            }
            for field in &self.w.group_fields {
                parts.push(format!("{}{suffix}", field.sql));
            }
        } else {
            let mut seg = self.w.visit(key)?;
            self.w.render(&mut seg)?;
            parts.push(format!("{}{suffix}", seg.sql.unwrap_or_default()));
        }
        for part in parts {
            match &mut self.order_sql {
                Some(existing) => {
                    existing.push(',');
                    existing.push_str(&part);
                }
                None => self.order_sql = Some(part),
            }
        }
        Ok(self)
    }

    /// Set the projection.
    pub fn select(mut self, projection: &Expr) -> Result<Self> {
        self.clause_gate()?;
        let fields = self.project_root(projection)?;
        self.select_fields = Some(fields);
        Ok(self)
    }

    /// Project the current grouping keys as a flat record.
    pub fn select_grouping(mut self) -> Result<Self> {
        self.clause_gate()?;
        if self.w.group_fields.is_empty() {
            return Err(Error::unsupported(
                "select_grouping() requires a preceding group_by",
            ));
        }
        self.select_fields = Some(self.grouping_leaves());
        Ok(self)
    }

    /// Request `SELECT DISTINCT`.
    pub fn distinct(mut self) -> Result<Self> {
        self.clause_gate()?;
        self.distinct = true;
        Ok(self)
    }

    /// Skip the first `n` rows. Triggers paginated rendering.
    pub fn skip(mut self, n: u64) -> Result<Self> {
        self.clause_gate()?;
        self.skip = Some(n);
        Ok(self)
    }

    /// Keep at most `n` rows. Triggers paginated rendering.
    pub fn take(mut self, n: u64) -> Result<Self> {
        self.clause_gate()?;
        self.take = Some(n);
        Ok(self)
    }

    /// One-based page addressing: `page(2, 10)` skips 10 and takes 10.
    pub fn page(mut self, page: u64, size: u64) -> Result<Self> {
        self.clause_gate()?;
        self.skip = Some(page.saturating_sub(1) * size);
        self.take = Some(size);
        Ok(self)
    }

    /// Union with another query.
    pub fn union(self, branch: Subquery) -> Result<Self> {
        self.union_with(branch, false)
    }

    /// Union-all with another query.
    pub fn union_all(self, branch: Subquery) -> Result<Self> {
        self.union_with(branch, true)
    }

    fn union_with(mut self, branch: Subquery, all: bool) -> Result<Self> {
        match self.state {
            BuilderState::Rendered => {
                return Err(Error::invalid_state("statement already rendered"))
            }
            BuilderState::Empty => {
                return Err(Error::invalid_state("no FROM table; call from() first"))
            }
            BuilderState::Assembling => {
                // Fold the statement so far into the union text; clause
                // state resets for anything arriving afterwards.
                let (sql, shape) = self.render_plain()?;
                self.union_fields = shape.fields;
                self.union_sql = Some(sql);
                self.where_sql = None;
                self.where_or = false;
                self.group_sql = None;
                self.having_sql = None;
                self.having_or = false;
                self.order_sql = None;
                self.distinct = false;
                self.w.group_fields.clear();
                self.state = BuilderState::Unioned;
            }
            BuilderState::Unioned => {}
        }
        self.union_count += 1;
        // Branch parameters get an isolated prefix; ordinals continue so
        // positional dialects stay correct.
        let prefix = format!("u{}p", self.union_count);
        let base = self.w.param_base + self.w.params.len();
        let child = QueryBuilder::nested(self.w.ctx.clone(), prefix, base);
        let inline = child.replay(&branch)?;
        self.w.params.extend(inline.params);
        let keyword = if all { " UNION ALL " } else { " UNION " };
        let current = self.union_sql.take().unwrap_or_default();
        self.union_sql = Some(format!("{current}{keyword}{}", inline.sql));
        Ok(self)
    }

    /// Wrap the pending union as an inline sub-query so further clauses
    /// compose over its output. Current FROM participants retire; the
    /// wrapped binding exposes the union's projected fields.
    fn wrap_union(&mut self) -> Result<()> {
        let body = self
            .union_sql
            .take()
            .ok_or_else(|| Error::invalid_state("no pending union to wrap"))?;
        for binding in &mut self.w.tables {
            binding.in_from = false;
        }
        self.w.param_tables.clear();
        let entity = self
            .w
            .tables
            .first()
            .map(|t| t.entity.clone())
            .unwrap_or_default();
        let alias = self.w.next_alias();
        let id = self.w.tables.len();
        let path = self.w.unique_path(&entity);
        let mut binding = TableBinding::root(entity, "", alias.clone(), path);
        binding.body = Some(format!("({body})"));
        binding.fields = retarget_fields(&self.union_fields, &alias, id, &self.w);
        self.w.add_binding(binding);
        self.w.param_tables.push(id);
        self.union_fields = Vec::new();
        self.state = BuilderState::Assembling;
        Ok(())
    }

    /// Register a navigation chain. One-to-one steps join in place (LEFT
    /// JOIN on FK = key); a one-to-many step must terminate the chain and
    /// registers a pending second-pass fetch.
    pub fn include(mut self, path: &Expr) -> Result<Self> {
        self.clause_gate()?;
        let (root, members) = member_chain(path)?;
        let root = self.w.param_tables.get(root).copied().ok_or_else(|| {
            Error::unsupported(format!("table parameter {root} is not bound"))
        })?;
        self.register_include(root, &members, false, None)?;
        Ok(self)
    }

    /// Register a one-to-many navigation for second-pass fetching.
    pub fn include_many(mut self, path: &Expr) -> Result<Self> {
        self.clause_gate()?;
        let (root, members) = member_chain(path)?;
        let root = self.w.param_tables.get(root).copied().ok_or_else(|| {
            Error::unsupported(format!("table parameter {root} is not bound"))
        })?;
        self.register_include(root, &members, true, None)?;
        Ok(self)
    }

    /// Register a one-to-many navigation with a filter over the target
    /// entity. The filter compiles against an isolated single-table
    /// statement and rides along on the fetch.
    pub fn include_many_filtered(mut self, path: &Expr, filter: &Expr) -> Result<Self> {
        self.clause_gate()?;
        let (root, members) = member_chain(path)?;
        let root = self.w.param_tables.get(root).copied().ok_or_else(|| {
            Error::unsupported(format!("table parameter {root} is not bound"))
        })?;
        self.register_include(root, &members, true, Some(filter))?;
        Ok(self)
    }

    /// Continue the last include with a further one-to-one step.
    pub fn then_include(mut self, member: &str) -> Result<Self> {
        self.clause_gate()?;
        let owner = self.last_include.ok_or_else(|| {
            Error::invalid_state("then_include requires a preceding include")
        })?;
        self.register_include(owner, std::slice::from_ref(&member.to_string()), false, None)?;
        Ok(self)
    }

    /// Continue the last include with a terminal one-to-many step.
    pub fn then_include_many(mut self, member: &str) -> Result<Self> {
        self.clause_gate()?;
        let owner = self.last_include.ok_or_else(|| {
            Error::invalid_state("then_include_many requires a preceding include")
        })?;
        self.register_include(owner, std::slice::from_ref(&member.to_string()), true, None)?;
        Ok(self)
    }

    /// Continue the last include with a filtered terminal one-to-many step.
    pub fn then_include_many_filtered(mut self, member: &str, filter: &Expr) -> Result<Self> {
        self.clause_gate()?;
        let owner = self.last_include.ok_or_else(|| {
            Error::invalid_state("then_include_many requires a preceding include")
        })?;
        self.register_include(
            owner,
            std::slice::from_ref(&member.to_string()),
            true,
            Some(filter),
        )?;
        Ok(self)
    }

    fn register_include(
        &mut self,
        root: TableId,
        members: &[String],
        want_many: bool,
        filter: Option<&Expr>,
    ) -> Result<()> {
        let mut owner = root;
        for (idx, member) in members.iter().enumerate() {
            let last = idx + 1 == members.len();
            let (owner_entity, owner_path, owner_is_include) = {
                let b = &self.w.tables[owner];
                (b.entity.clone(), b.path.clone(), b.include)
            };
            if owner_is_include {
                return Err(Error::unsupported(format!(
                    "cannot chain past one-to-many include '{owner_path}'"
                )));
            }
            let schema = self.w.ctx.schema.clone();
            let map = schema.entity(&owner_entity)?;
            let nav = map.navigation(member)?.clone();
            let child_path = format!("{owner_path}.{member}");
            if let Some(existing) = self.w.find_by_path(&child_path) {
                // Already registered; a terminal filter updates in place.
                if last {
                    if let Some(pred) = filter {
                        let (sql, params) = self.render_include_filter(&nav.target, pred)?;
                        if let Some(seg) =
                            self.includes.iter_mut().find(|s| s.path == child_path)
                        {
                            seg.filter_sql = Some(sql);
                            seg.filter_params = params;
                        }
                        self.w.mark_used(existing);
                    }
                }
                owner = existing;
                continue;
            }
            match nav.cardinality {
                Cardinality::OneToOne => {
                    if last && want_many {
                        return Err(Error::unsupported(format!(
                            "include_many requires a one-to-many navigation at '{child_path}'"
                        )));
                    }
                    let target_map = schema.entity(&nav.target)?;
                    let fk_def = map.require_member(&nav.foreign_key)?;
                    let key_def = target_map.single_key()?;
                    let (fk_column, key_column) = (fk_def.column.clone(), key_def.column.clone());
                    let alias = self.w.next_alias();
                    let id = self.w.add_binding(TableBinding::joined(
                        nav.target.clone(),
                        target_map.table.clone(),
                        alias,
                        child_path,
                        JoinKind::Left,
                        Some(owner),
                    ));
                    let on = format!(
                        "{}{}={}{}",
                        self.w.qualify(owner),
                        self.w.ctx.dialect.quote(&fk_column),
                        self.w.qualify(id),
                        self.w.ctx.dialect.quote(&key_column)
                    );
                    self.w.tables[id].on_sql = Some(on);
                    owner = id;
                }
                Cardinality::OneToMany => {
                    if !last {
                        return Err(Error::unsupported(format!(
                            "a one-to-many step must terminate an include chain: '{child_path}'"
                        )));
                    }
                    let target_map = schema.entity(&nav.target)?;
                    let alias = self.w.next_alias();
                    let id = self.w.add_binding(TableBinding::pending_include(
                        nav.target.clone(),
                        target_map.table.clone(),
                        alias,
                        child_path.clone(),
                        owner,
                    ));
                    let (filter_sql, filter_params) = match filter {
                        Some(pred) => {
                            let (sql, params) = self.render_include_filter(&nav.target, pred)?;
                            (Some(sql), params)
                        }
                        None => (None, Vec::new()),
                    };
                    // A filter is an observable use even without member access.
                    if filter_sql.is_some() {
                        self.w.mark_used(id);
                    }
                    self.includes.push(IncludeSegment {
                        path: child_path,
                        owner,
                        owner_entity,
                        binding: id,
                        target_entity: nav.target.clone(),
                        foreign_key: nav.foreign_key.clone(),
                        filter_sql,
                        filter_params,
                    });
                    owner = id;
                }
            }
        }
        self.last_include = Some(owner);
        Ok(())
    }

    /// Compile an include filter against an isolated single-table
    /// statement; its parameters belong to the fetch, not this statement.
    fn render_include_filter(&self, entity: &str, predicate: &Expr) -> Result<(String, Vec<SqlParam>)> {
        let mut w = SqlWalker::new(self.w.ctx.clone());
        let schema = w.ctx.schema.clone();
        let map = schema.entity(entity)?;
        let alias = w.next_alias();
        let id = w.add_binding(TableBinding::root(
            entity,
            map.table.clone(),
            alias,
            entity.to_string(),
        ));
        w.param_tables.push(id);
        let sql = w.condition(predicate)?;
        Ok((sql, w.params))
    }

    /// Render the statement. Runs once; a second call reports the rendered
    /// state. Paginated statements render as `count;page`.
    pub fn build(&mut self) -> Result<SqlStatement> {
        match self.state {
            BuilderState::Rendered => {
                return Err(Error::invalid_state("statement already rendered"))
            }
            BuilderState::Empty => {
                return Err(Error::invalid_state("no FROM table; call from() first"))
            }
            _ => {}
        }
        if self.state == BuilderState::Unioned && (self.skip.is_some() || self.take.is_some()) {
            self.wrap_union()?;
        }
        let (sql, shape) = if self.state == BuilderState::Unioned {
            let sql = self
                .union_sql
                .take()
                .ok_or_else(|| Error::invalid_state("no pending union to render"))?;
            let shape = ResultShape::new(std::mem::take(&mut self.union_fields));
            (sql, shape)
        } else if self.skip.is_some() || self.take.is_some() {
            self.render_paged()?
        } else {
            self.render_plain()?
        };
        self.state = BuilderState::Rendered;
        self.shape = Some(shape.clone());
        let params = std::mem::take(&mut self.w.params);
        tracing::debug!(
            tables = self.w.tables.len(),
            params = params.len(),
            columns = shape.column_count(),
            "assembled select statement"
        );
        Ok(SqlStatement { sql, params, shape })
    }

    /// Fetch statements for the includes this statement observably uses,
    /// keyed off a single root row.
    pub fn build_include_sql(&self, root: &EntityRecord) -> Result<Vec<IncludeStatement>> {
        self.include_statements(std::slice::from_ref(root))
    }

    /// Fetch statements for a batch of root rows. Keys from every root
    /// land in one IN list per include.
    pub fn build_include_sql_many(&self, roots: &[EntityRecord]) -> Result<Vec<IncludeStatement>> {
        self.include_statements(roots)
    }

    fn include_statements(&self, roots: &[EntityRecord]) -> Result<Vec<IncludeStatement>> {
        let shape = self.shape.as_ref().ok_or_else(|| {
            Error::invalid_state("build() must render before include statements")
        })?;
        let mut out = Vec::new();
        for seg in &self.includes {
            if !self.w.tables[seg.binding].used {
                continue;
            }
            let header = include::fetch_header(&self.w.ctx, &seg.target_entity, &seg.foreign_key)?;
            let appender = include::key_appender(&self.w.ctx, shape, seg)?;
            let mut keys = String::new();
            appender(roots, &mut keys);
            let sql = match &seg.filter_sql {
                Some(filter) => format!("{header}{keys}) AND ({filter})"),
                None => format!("{header}{keys})"),
            };
            tracing::debug!(path = %seg.path, "assembled include fetch");
            out.push(IncludeStatement {
                path: seg.path.clone(),
                sql,
                params: seg.filter_params.clone(),
            });
        }
        Ok(out)
    }

    /// Read the include result sets and graft them onto one root record.
    /// The cursor must hold one result set per used include, in order.
    pub fn set_include_values(
        &self,
        root: &mut EntityRecord,
        cursor: &mut dyn RowCursor,
    ) -> Result<()> {
        self.apply_include_values(std::slice::from_mut(root), cursor, true)
    }

    /// Read the include result sets and distribute rows across a batch of
    /// root records by foreign key.
    pub fn set_include_values_many(
        &self,
        roots: &mut [EntityRecord],
        cursor: &mut dyn RowCursor,
    ) -> Result<()> {
        self.apply_include_values(roots, cursor, false)
    }

    fn apply_include_values(
        &self,
        roots: &mut [EntityRecord],
        cursor: &mut dyn RowCursor,
        single: bool,
    ) -> Result<()> {
        let shape = self.shape.as_ref().ok_or_else(|| {
            Error::invalid_state("build() must render before include values")
        })?;
        let used: Vec<&IncludeSegment> = self
            .includes
            .iter()
            .filter(|seg| self.w.tables[seg.binding].used)
            .collect();
        if used.is_empty() {
            return Ok(());
        }
        let binder = include::include_binder(&self.w.ctx, shape, &used, single)?;
        binder(roots, cursor)
    }

    /// Replay recorded sub-query operations and render inline.
    pub(crate) fn replay(mut self, query: &Subquery) -> Result<InlineQuery> {
        for op in &query.ops {
            self = match op {
                QueryOp::From(entity) => self.from(entity)?,
                QueryOp::Join(kind, entity, on) => self.join(*kind, entity, on)?,
                QueryOp::Where(predicate) => self.filter(predicate)?,
                QueryOp::GroupBy(keys) => self.group_by(keys)?,
                QueryOp::Having(predicate) => self.having(predicate)?,
                QueryOp::OrderBy(direction, key) => match direction {
                    relq_expr::OrderDirection::Asc => self.order_by(key)?,
                    relq_expr::OrderDirection::Desc => self.order_by_desc(key)?,
                },
                QueryOp::Select(projection) => self.select(projection)?,
                QueryOp::Distinct => self.distinct()?,
            };
        }
        if self.state == BuilderState::Empty {
            return Err(Error::invalid_state("sub-query has no FROM table"));
        }
        let entity = self
            .w
            .tables
            .first()
            .map(|t| t.entity.clone())
            .unwrap_or_default();
        let (sql, shape) = self.render_plain()?;
        Ok(InlineQuery {
            sql,
            params: std::mem::take(&mut self.w.params),
            fields: shape.fields,
            entity,
        })
    }

    fn render_plain(&mut self) -> Result<(String, ResultShape)> {
        let (list, shape) = self.field_list()?;
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&list);
        sql.push_str(" FROM ");
        sql.push_str(&self.from_text());
        sql.push_str(&self.others_text());
        if let Some(order) = &self.order_sql {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        Ok((sql, shape))
    }

    fn render_paged(&mut self) -> Result<(String, ResultShape)> {
        let (list, shape) = self.field_list()?;
        let from = self.from_text();
        let others = self.others_text();
        let mut count = format!("SELECT COUNT(*) FROM {from}");
        if let Some(where_sql) = &self.where_sql {
            count.push_str(" WHERE ");
            count.push_str(where_sql);
        }
        let fields = if self.distinct {
            format!("DISTINCT {list}")
        } else {
            list
        };
        let page = self
            .w
            .ctx
            .dialect
            .page_template(self.skip, self.take, self.order_sql.as_deref())
            .replace("/**fields**/", &fields)
            .replace("/**tables**/", &from)
            .replace("/**others**/", &others);
        Ok((format!("{count};{page}"), shape))
    }

    fn field_list(&mut self) -> Result<(String, ResultShape)> {
        let fields = match self.select_fields.take() {
            Some(fields) => fields,
            None => self.default_fields()?,
        };
        let shape = ResultShape::new(fields);
        let mut list = String::new();
        for (i, leaf) in shape.leaves().into_iter().enumerate() {
            if i > 0 {
                list.push(',');
            }
            list.push_str(leaf.sql.as_deref().unwrap_or_default());
            if leaf.aliased {
                list.push_str(" AS ");
                list.push_str(&self.w.ctx.dialect.quote(&leaf.target_member));
            }
        }
        Ok((list, shape))
    }

    /// With no explicit projection, the first FROM root expands.
    fn default_fields(&mut self) -> Result<Vec<ResultField>> {
        let root = self
            .w
            .tables
            .iter()
            .position(|t| t.in_from)
            .ok_or_else(|| Error::invalid_state("no FROM table; call from() first"))?;
        self.entity_fields(root)
    }

    fn project_root(&mut self, expr: &Expr) -> Result<Vec<ResultField>> {
        self.w.clause = Clause::Select;
        match expr {
            Expr::Object(members) => members
                .iter()
                .map(|(name, expr)| self.project_member(name, expr))
                .collect(),
            Expr::Param(i) => {
                let table = self.w.param_tables.get(*i).copied().ok_or_else(|| {
                    Error::unsupported(format!("table parameter {i} is not bound"))
                })?;
                self.entity_fields(table)
            }
            Expr::Grouping => {
                if self.w.group_fields.is_empty() {
                    return Err(Error::unsupported(
                        "selecting the grouping requires a preceding group_by",
                    ));
                }
                Ok(self.grouping_leaves())
            }
            other => {
                let seg = self.w.visit(other)?;
                if seg.entity_ref {
                    let table = seg
                        .table
                        .ok_or_else(|| Error::unsupported("unbound table reference"))?;
                    return self.entity_fields(table);
                }
                let mut seg = seg;
                self.w.render(&mut seg)?;
                let target = seg.member.clone().unwrap_or_else(|| "Value".to_string());
                let mut leaf =
                    ResultField::scalar(seg.sql.unwrap_or_default(), target);
                leaf.table = seg.table;
                leaf.from_member = seg.member;
                Ok(vec![leaf])
            }
        }
    }

    fn project_member(&mut self, name: &str, expr: &Expr) -> Result<ResultField> {
        match expr {
            Expr::Param(i) => {
                let table = self.w.param_tables.get(*i).copied().ok_or_else(|| {
                    Error::unsupported(format!("table parameter {i} is not bound"))
                })?;
                self.entity_node(name, table)
            }
            Expr::Object(members) => {
                let mut children = Vec::with_capacity(members.len());
                for (child_name, child) in members {
                    children.push(self.project_member(child_name, child)?);
                }
                Ok(ResultField::bundle(name, children))
            }
            Expr::Grouping => {
                if self.w.group_fields.is_empty() {
                    return Err(Error::unsupported(
                        "selecting the grouping requires a preceding group_by",
                    ));
                }
                Ok(ResultField::bundle(name, self.grouping_leaves()))
            }
            other => {
                let seg = self.w.visit(other)?;
                if seg.entity_ref {
                    let table = seg
                        .table
                        .ok_or_else(|| Error::unsupported("unbound table reference"))?;
                    return self.entity_node(name, table);
                }
                let mut seg = seg;
                self.w.render(&mut seg)?;
                let sql = seg.sql.unwrap_or_default();
                let aliased = if seg.is_expression || seg.is_param || seg.member.is_none() {
                    true
                } else {
                    output_name(&sql) != name
                };
                let mut leaf = ResultField::scalar(sql, name);
                leaf.table = seg.table;
                leaf.from_member = seg.member;
                leaf.aliased = aliased;
                Ok(leaf)
            }
        }
    }

    fn entity_node(&mut self, name: &str, table: TableId) -> Result<ResultField> {
        let children = self.entity_fields(table)?;
        let entity = self.w.tables[table].entity.clone();
        Ok(ResultField::entity(name, table, children).of_entity(entity))
    }

    /// Flat column leaves for a binding: every mapped column, in map order.
    /// Sub-query bindings reuse their projected fields as-is.
    fn entity_fields(&mut self, table: TableId) -> Result<Vec<ResultField>> {
        if self.w.tables[table].body.is_some() {
            return Ok(self.w.tables[table].fields.clone());
        }
        let (entity, qualifier) = (
            self.w.tables[table].entity.clone(),
            self.w.qualify(table),
        );
        let schema = self.w.ctx.schema.clone();
        let map = schema.entity(&entity)?;
        let mut out = Vec::new();
        for def in map.columns() {
            let quoted = self.w.ctx.dialect.quote(&def.column);
            let mut leaf = ResultField::scalar(format!("{qualifier}{quoted}"), def.member.clone())
                .from(def.member.clone());
            leaf.table = Some(table);
            leaf.key = def.key;
            leaf.aliased = def.column != def.member;
            out.push(leaf);
        }
        Ok(out)
    }

    fn grouping_leaves(&self) -> Vec<ResultField> {
        self.w
            .group_fields
            .iter()
            .map(|field| {
                let mut leaf = ResultField::scalar(field.sql.clone(), field.member.clone());
                leaf.aliased = output_name(&field.sql) != field.member;
                leaf
            })
            .collect()
    }

    fn from_text(&self) -> String {
        let aliases = self.w.aliases_on();
        let mut out = String::new();
        let mut first = true;
        for binding in self.w.tables.iter().filter(|t| t.in_from) {
            let source = match &binding.body {
                Some(body) => body.clone(),
                None => self.w.ctx.dialect.quote(&binding.table),
            };
            // Derived tables always carry their alias.
            let rendered = if aliases || binding.body.is_some() {
                format!("{source} {}", binding.alias)
            } else {
                source
            };
            if first {
                out.push_str(&rendered);
                first = false;
                continue;
            }
            match binding.join {
                Some(kind) => {
                    out.push(' ');
                    out.push_str(kind.keyword());
                    out.push(' ');
                    out.push_str(&rendered);
                    out.push_str(" ON ");
                    out.push_str(binding.on_sql.as_deref().unwrap_or_default());
                }
                None => {
                    out.push(',');
                    out.push_str(&rendered);
                }
            }
        }
        out
    }

    fn others_text(&self) -> String {
        let mut out = String::new();
        if let Some(where_sql) = &self.where_sql {
            out.push_str(" WHERE ");
            out.push_str(where_sql);
        }
        if let Some(group_sql) = &self.group_sql {
            out.push_str(" GROUP BY ");
            out.push_str(group_sql);
        }
        if let Some(having_sql) = &self.having_sql {
            out.push_str(" HAVING ");
            out.push_str(having_sql);
        }
        out
    }
}

/// Conjoin a predicate onto an accumulating clause. OR-rooted pieces wrap
/// in parentheses on either side of the AND.
pub(super) fn and_append(slot: &mut Option<String>, slot_or: &mut bool, text: String, text_or: bool) {
    match slot.take() {
        None => {
            *slot = Some(text);
            *slot_or = text_or;
        }
        Some(existing) => {
            let left = if *slot_or {
                format!("({existing})")
            } else {
                existing
            };
            let right = if text_or { format!("({text})") } else { text };
            *slot = Some(format!("{left} AND {right}"));
            *slot_or = false;
        }
    }
}

/// Decompose an include path into its root parameter and member chain.
fn member_chain(expr: &Expr) -> Result<(usize, Vec<String>)> {
    let mut members = Vec::new();
    let mut current = expr;
    loop {
        match current {
            Expr::Member { base, member } => {
                members.push(member.clone());
                current = base;
            }
            Expr::Param(i) => {
                members.reverse();
                return Ok((*i, members));
            }
            _ => {
                return Err(Error::unsupported(
                    "include paths must be member chains rooted at a table parameter",
                ))
            }
        }
    }
}

/// Requalify sub-query fields under their new outer alias: every leaf
/// becomes `alias.name`, keeping the projected structure (and therefore
/// the materialization plan) intact.
fn retarget_fields(
    fields: &[ResultField],
    alias: &str,
    table: TableId,
    w: &SqlWalker,
) -> Vec<ResultField> {
    fields
        .iter()
        .map(|field| {
            let mut out = field.clone();
            out.table = Some(table);
            if out.kind == FieldKind::Scalar {
                out.sql = Some(format!(
                    "{alias}.{}",
                    w.ctx.dialect.quote(&field.target_member)
                ));
                out.from_member = Some(field.target_member.clone());
                out.aliased = false;
            } else {
                out.children = retarget_fields(&field.children, alias, table, w);
            }
            out
        })
        .collect()
}

/// Output column name of a bare column reference: the last path segment,
/// stripped of identifier quoting.
fn output_name(sql: &str) -> &str {
    let tail = sql.rsplit('.').next().unwrap_or(sql);
    tail.trim_matches(|c: char| matches!(c, '`' | '"' | '[' | ']'))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relq_expr::Value;

    use super::*;
    use crate::dialect::MySqlDialect;
    use crate::schema::{EntityMap, MemberDef, ScalarType, SchemaCatalog};

    fn context() -> QueryContext {
        let schema = SchemaCatalog::new()
            .with_entity(
                EntityMap::new("Order", "sys_order")
                    .with_member(MemberDef::new("Id", ScalarType::Int32).as_key())
                    .with_member(MemberDef::new("BuyerId", ScalarType::Int32))
                    .with_member(MemberDef::new("Amount", ScalarType::Float64))
                    .with_member(MemberDef::new("Name", ScalarType::String)),
            )
            .with_entity(
                EntityMap::new("User", "sys_user")
                    .with_member(MemberDef::new("Id", ScalarType::Int32).as_key())
                    .with_member(MemberDef::new("Name", ScalarType::String)),
            );
        QueryContext::new(Arc::new(MySqlDialect), Arc::new(schema))
    }

    #[test]
    fn test_default_projection_expands_root() {
        let mut q = QueryBuilder::new(context()).from("Order").unwrap();
        let stmt = q.build().unwrap();
        assert_eq!(stmt.sql, "SELECT Id,BuyerId,Amount,Name FROM sys_order");
        assert!(stmt.params.is_empty());
        assert_eq!(stmt.shape.column_count(), 4);
    }

    #[test]
    fn test_join_select_filter() {
        let mut q = QueryBuilder::new(context())
            .from("Order")
            .unwrap()
            .inner_join(
                "User",
                &Expr::param(0).member("BuyerId").eq(Expr::param(1).member("Id")),
            )
            .unwrap()
            .filter(&Expr::param(1).member("Name").eq("Kevin"))
            .unwrap()
            .select(&Expr::object([
                ("Id", Expr::param(0).member("Id")),
                ("Name", Expr::param(1).member("Name")),
            ]))
            .unwrap();
        let stmt = q.build().unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT a.Id,b.Name FROM sys_order a INNER JOIN sys_user b ON a.BuyerId=b.Id WHERE b.Name=@p0"
        );
        assert_eq!(stmt.params.len(), 1);
        assert_eq!(stmt.params[0].name, "@p0");
        assert_eq!(stmt.params[0].value, Value::String("Kevin".into()));
    }

    #[test]
    fn test_group_having_order() {
        let mut q = QueryBuilder::new(context())
            .from("Order")
            .unwrap()
            .group_by(&Expr::param(0).member("BuyerId"))
            .unwrap()
            .having(&Expr::count().gt(3))
            .unwrap()
            .select(&Expr::object([
                ("BuyerId", Expr::grouping().member("BuyerId")),
                ("Total", Expr::sum(Expr::param(0).member("Amount"))),
            ]))
            .unwrap()
            .order_by_desc(&Expr::grouping().member("BuyerId"))
            .unwrap();
        let stmt = q.build().unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT BuyerId,SUM(Amount) AS Total FROM sys_order GROUP BY BuyerId HAVING COUNT(*)>3 ORDER BY BuyerId DESC"
        );
    }

    #[test]
    fn test_order_by_bare_grouping_expands_all_keys() {
        let mut q = QueryBuilder::new(context())
            .from("Order")
            .unwrap()
            .group_by(&Expr::object([
                ("BuyerId", Expr::param(0).member("BuyerId")),
                ("Name", Expr::param(0).member("Name")),
            ]))
            .unwrap()
            .select_grouping()
            .unwrap()
            .order_by_desc(&Expr::grouping())
            .unwrap();
        let stmt = q.build().unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT BuyerId,Name FROM sys_order GROUP BY BuyerId,Name ORDER BY BuyerId DESC,Name DESC"
        );
    }

    #[test]
    fn test_order_by_grouping_without_group_by_is_an_error() {
        let err = QueryBuilder::new(context())
            .from("Order")
            .unwrap()
            .order_by(&Expr::grouping())
            .unwrap_err();
        assert!(err.to_string().contains("group_by"));
    }

    #[test]
    fn test_pagination_renders_count_then_page() {
        let mut q = QueryBuilder::new(context())
            .from("Order")
            .unwrap()
            .filter(&Expr::param(0).member("Amount").gt(10))
            .unwrap()
            .order_by(&Expr::param(0).member("Id"))
            .unwrap()
            .page(3, 10)
            .unwrap();
        let stmt = q.build().unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM sys_order WHERE Amount>10;\
             SELECT Id,BuyerId,Amount,Name FROM sys_order WHERE Amount>10 ORDER BY Id LIMIT 20,10"
        );
        assert!(!stmt.sql.contains("/**"));
    }

    #[test]
    fn test_second_filter_conjoins_with_parens() {
        let mut q = QueryBuilder::new(context())
            .from("Order")
            .unwrap()
            .filter(
                &Expr::param(0)
                    .member("Id")
                    .eq(1)
                    .or(Expr::param(0).member("Id").eq(2)),
            )
            .unwrap()
            .filter(&Expr::param(0).member("Amount").gt(5))
            .unwrap();
        let stmt = q.build().unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT Id,BuyerId,Amount,Name FROM sys_order WHERE (Id=1 OR Id=2) AND Amount>5"
        );
    }

    #[test]
    fn test_build_twice_reports_state() {
        let mut q = QueryBuilder::new(context()).from("Order").unwrap();
        q.build().unwrap();
        let err = q.build().unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_clause_before_from_reports_state() {
        let err = QueryBuilder::new(context())
            .filter(&Expr::param(0).member("Id").eq(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_union_then_clause_wraps() {
        let branch = Subquery::from("Order").filter(Expr::param(0).member("Id").eq(2));
        let mut q = QueryBuilder::new(context())
            .from("Order")
            .unwrap()
            .filter(&Expr::param(0).member("Id").eq(1))
            .unwrap()
            .union(branch)
            .unwrap()
            .order_by(&Expr::param(0).member("Id"))
            .unwrap();
        let stmt = q.build().unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT b.Id,b.BuyerId,b.Amount,b.Name FROM \
             (SELECT Id,BuyerId,Amount,Name FROM sys_order WHERE Id=1 \
             UNION \
             SELECT Id,BuyerId,Amount,Name FROM sys_order WHERE Id=2) b \
             ORDER BY b.Id"
        );
        assert_eq!(stmt.params.len(), 0);
    }

    #[test]
    fn test_union_params_get_branch_prefix() {
        let branch = Subquery::from("Order").filter(Expr::param(0).member("Name").eq("B"));
        let mut q = QueryBuilder::new(context())
            .from("Order")
            .unwrap()
            .filter(&Expr::param(0).member("Name").eq("A"))
            .unwrap()
            .union(branch)
            .unwrap();
        let stmt = q.build().unwrap();
        assert_eq!(stmt.params.len(), 2);
        assert_eq!(stmt.params[0].name, "@p0");
        assert_eq!(stmt.params[1].name, "@u1p1");
        assert!(stmt.sql.contains("Name=@p0"));
        assert!(stmt.sql.contains("Name=@u1p1"));
    }

    #[test]
    fn test_named_subquery_fields_reused() {
        let named = Subquery::from("Order")
            .filter(Expr::param(0).member("Amount").gt(100))
            .select(Expr::object([
                ("Id", Expr::param(0).member("Id")),
                ("Amount", Expr::param(0).member("Amount")),
            ]));
        let mut q = QueryBuilder::new(context())
            .with_table(named)
            .unwrap()
            .filter(&Expr::param(0).member("Amount").lt(500))
            .unwrap();
        let stmt = q.build().unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT a.Id,a.Amount FROM (SELECT Id,Amount FROM sys_order WHERE Amount>100) a WHERE a.Amount<500"
        );
    }

    #[test]
    fn test_distinct_and_take() {
        let mut q = QueryBuilder::new(context())
            .from("Order")
            .unwrap()
            .select(&Expr::object([("BuyerId", Expr::param(0).member("BuyerId"))]))
            .unwrap()
            .distinct()
            .unwrap()
            .take(5)
            .unwrap();
        let stmt = q.build().unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM sys_order;SELECT DISTINCT BuyerId FROM sys_order LIMIT 5"
        );
    }
}
