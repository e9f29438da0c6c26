//! The expression walker: captured trees in, SQL fragments out.
//!
//! One [`SqlWalker`] serves one statement. It owns the table-binding arena,
//! the bound parameter list, and the grouping context, and renders each
//! visited node into a [`SqlSegment`]. Rendering is single-pass: text is
//! emitted as nodes are visited, so tables must be registered before the
//! clauses that reference them.

use std::sync::Arc;

use relq_expr::{BinaryOp, CallExpr, Expr, InList, Method, Subquery, UnaryOp, Value};

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::schema::{ScalarType, SchemaCatalog};

use super::builder::QueryBuilder;
use super::field::{FieldKind, ResultField};
use super::segment::{SqlParam, SqlSegment};
use super::table::{alias_at, TableBinding, TableId};

/// Shared compilation context: dialect, schema, and alias policy.
#[derive(Clone)]
pub struct QueryContext {
    /// Active SQL dialect.
    pub dialect: Arc<dyn Dialect>,
    /// Entity maps.
    pub schema: Arc<SchemaCatalog>,
    /// First alias letter handed out by each statement.
    pub alias_start: char,
}

impl QueryContext {
    /// Create a context with the default alias sequence (`a`, `b`, ...).
    pub fn new(dialect: Arc<dyn Dialect>, schema: Arc<SchemaCatalog>) -> Self {
        Self {
            dialect,
            schema,
            alias_start: 'a',
        }
    }

    /// Override the first alias letter.
    pub fn with_alias_start(mut self, start: char) -> Self {
        self.alias_start = start;
        self
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("dialect", &self.dialect.name())
            .field("entities", &self.schema.len())
            .field("alias_start", &self.alias_start)
            .finish()
    }
}

/// The clause currently being rendered. Some translations are positional:
/// aggregates are rejected in filters and join conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Clause {
    Where,
    Having,
    On,
    Select,
    GroupBy,
    OrderBy,
    Insert,
}

impl Clause {
    fn label(self) -> &'static str {
        match self {
            Clause::Where => "WHERE",
            Clause::Having => "HAVING",
            Clause::On => "ON",
            Clause::Select => "SELECT",
            Clause::GroupBy => "GROUP BY",
            Clause::OrderBy => "ORDER BY",
            Clause::Insert => "INSERT",
        }
    }
}

/// One registered grouping key.
#[derive(Debug, Clone)]
pub(crate) struct GroupField {
    /// Key name, as referenced through the grouping placeholder.
    pub member: String,
    /// Rendered key text, reused verbatim downstream.
    pub sql: String,
}

#[derive(Debug)]
pub(crate) struct SqlWalker {
    pub ctx: QueryContext,
    /// Binding arena. Bindings retire (leave the FROM clause) but are never
    /// removed, so indices stay stable for the statement's lifetime.
    pub tables: Vec<TableBinding>,
    /// Positional lambda parameters, mapping `Expr::Param(i)` to a binding.
    pub param_tables: Vec<TableId>,
    pub params: Vec<SqlParam>,
    /// Parameter name prefix (`p`, or `u{n}p` inside union branches).
    pub param_prefix: String,
    /// Ordinal offset for parameters, so nested statements continue the
    /// outer numbering.
    pub param_base: usize,
    pub group_fields: Vec<GroupField>,
    /// Once set, aliases render even for single-table statements. Sticky.
    pub force_alias: bool,
    pub clause: Clause,
    alias_seq: usize,
}

impl SqlWalker {
    pub fn new(ctx: QueryContext) -> Self {
        Self::with_params(ctx, "p".to_string(), 0)
    }

    pub fn with_params(ctx: QueryContext, param_prefix: String, param_base: usize) -> Self {
        Self {
            ctx,
            tables: Vec::new(),
            param_tables: Vec::new(),
            params: Vec::new(),
            param_prefix,
            param_base,
            group_fields: Vec::new(),
            force_alias: false,
            clause: Clause::Where,
            alias_seq: 0,
        }
    }

    /// Next alias in the statement's sequence. Monotonic; retired bindings
    /// do not return their letters.
    pub fn next_alias(&mut self) -> String {
        let alias = alias_at(self.ctx.alias_start, self.alias_seq);
        self.alias_seq += 1;
        alias
    }

    pub fn add_binding(&mut self, binding: TableBinding) -> TableId {
        self.tables.push(binding);
        self.tables.len() - 1
    }

    pub fn find_by_path(&self, path: &str) -> Option<TableId> {
        self.tables.iter().position(|t| t.path == path)
    }

    /// A root path not yet taken: `Order`, then `Order#1`, and so on.
    pub fn unique_path(&self, base: &str) -> String {
        if self.find_by_path(base).is_none() {
            return base.to_string();
        }
        let mut n = 1usize;
        loop {
            let candidate = format!("{base}#{n}");
            if self.find_by_path(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    fn from_count(&self) -> usize {
        self.tables.iter().filter(|t| t.in_from).count()
    }

    /// Whether column references qualify with their binding alias.
    pub fn aliases_on(&self) -> bool {
        self.force_alias || self.from_count() > 1
    }

    /// Alias prefix (`a.`) for a binding, or empty while aliasing is off.
    /// Sub-query bindings always qualify: a derived table carries its alias
    /// regardless of how many tables the statement holds.
    pub fn qualify(&self, table: TableId) -> String {
        if self.aliases_on() || self.tables[table].body.is_some() {
            format!("{}.", self.tables[table].alias)
        } else {
            String::new()
        }
    }

    /// Mark a binding and its owner chain as observably used.
    pub(crate) fn mark_used(&mut self, table: TableId) {
        let mut current = Some(table);
        while let Some(id) = current {
            let binding = &mut self.tables[id];
            binding.used = true;
            current = binding.parent;
        }
    }

    /// Bind a value as the next positional parameter.
    pub fn add_param(&mut self, value: Value) -> String {
        let ordinal = self.param_base + self.params.len();
        let name = format!("{}{}", self.param_prefix, ordinal);
        let placeholder = self.ctx.dialect.placeholder(ordinal, &name);
        self.params.push(SqlParam::new(placeholder.clone(), value));
        placeholder
    }

    /// Bind a value under an explicit name (insert projections).
    pub fn add_named_param(&mut self, name: &str, value: Value) -> String {
        let ordinal = self.param_base + self.params.len();
        let placeholder = self.ctx.dialect.placeholder(ordinal, name);
        self.params.push(SqlParam::new(placeholder.clone(), value));
        placeholder
    }

    /// Visit one node.
    pub fn visit(&mut self, expr: &Expr) -> Result<SqlSegment> {
        match expr {
            Expr::Value(v) => Ok(SqlSegment::literal(v.clone())),
            Expr::Param(i) => {
                let table = self.param_tables.get(*i).copied().ok_or_else(|| {
                    Error::unsupported(format!("table parameter {i} is not bound"))
                })?;
                Ok(SqlSegment::entity(table))
            }
            Expr::Member { base, member } => self.visit_member(base, member),
            Expr::Unary { op, operand } => self.visit_unary(*op, operand),
            Expr::Binary { op, left, right } => self.visit_binary(*op, left, right),
            Expr::Call(call) => self.visit_call(call),
            Expr::In {
                target,
                list,
                negated,
            } => self.visit_in(target, list, *negated),
            Expr::Exists {
                entity,
                predicate,
                negated,
            } => self.visit_exists(entity, predicate, *negated),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => self.visit_conditional(test, if_true, if_false),
            Expr::Index { base, index } => self.visit_index(base, *index),
            Expr::Subquery(sq) => {
                let inner = self.subquery_text(sq)?;
                Ok(SqlSegment::expression(inner, false))
            }
            Expr::Grouping => Err(Error::unsupported(
                "a grouping reference is only valid after group_by",
            )),
            Expr::Object(_) => Err(Error::unsupported(
                "object construction is only valid in a projection",
            )),
            Expr::Collection(_) => Err(Error::unsupported(
                "a collection literal is only valid behind an indexer or IN list",
            )),
        }
    }

    /// Visit in boolean position and resolve to predicate text.
    pub fn condition(&mut self, expr: &Expr) -> Result<String> {
        let seg = self.visit(expr)?;
        self.condition_text(seg)
    }

    /// Render a not-yet-rendered segment, applying the parameterization
    /// policy: strings, bytes, timestamps, and UUIDs bind as parameters;
    /// bool, int, and float constants render inline. A pending deferred
    /// stack resolves into parenthesized predicate text.
    pub fn render(&mut self, seg: &mut SqlSegment) -> Result<()> {
        if seg.has_field && !seg.deferred.is_empty() {
            let column = seg.sql.clone().unwrap_or_default();
            let (target, flipped) = seg.resolve_deferred();
            let text = match target {
                Value::Null => {
                    format!("{column} IS {}NULL", if flipped { "NOT " } else { "" })
                }
                other => format!(
                    "{column}{}{}",
                    if flipped { "<>" } else { "=" },
                    self.ctx.dialect.literal(&other)
                ),
            };
            seg.sql = Some(format!("({text})"));
            seg.is_expression = true;
            return Ok(());
        }
        if seg.sql.is_some() {
            return Ok(());
        }
        if seg.entity_ref {
            return Err(Error::unsupported(
                "a table reference has no scalar rendering",
            ));
        }
        let value = seg.value.clone().unwrap_or(Value::Null);
        match value {
            Value::String(_) | Value::Bytes(_) | Value::Timestamp(_) | Value::Uuid(_) => {
                let placeholder = self.add_param(value);
                seg.sql = Some(placeholder);
                seg.is_param = true;
            }
            Value::List(_) => Err(Error::unsupported(
                "a captured collection has no scalar rendering; use an IN list",
            ))?,
            other => {
                seg.sql = Some(self.ctx.dialect.literal(&other));
            }
        }
        Ok(())
    }

    /// Resolve a visited segment in boolean position.
    fn condition_text(&mut self, mut seg: SqlSegment) -> Result<String> {
        if seg.entity_ref {
            return Err(Error::unsupported(
                "a table reference cannot be used as a condition",
            ));
        }
        if seg.is_expression {
            return Ok(seg.sql.take().unwrap_or_default());
        }
        if seg.has_field {
            let had_ops = !seg.deferred.is_empty();
            let column = seg.sql.clone().unwrap_or_default();
            let scalar = seg.scalar;
            let nullable = seg.nullable;
            let member = seg.member.take();
            let (target, flipped) = seg.resolve_deferred();
            return match target {
                Value::Null => Ok(format!(
                    "{column} IS {}NULL",
                    if flipped { "NOT " } else { "" }
                )),
                other => {
                    if !had_ops && (scalar != Some(ScalarType::Bool) || nullable) {
                        return Err(match member {
                            Some(member) if nullable => Error::NullableCondition { member },
                            _ => Error::unsupported(format!(
                                "'{column}' is not a boolean condition"
                            )),
                        });
                    }
                    Ok(format!(
                        "{column}{}{}",
                        if flipped { "<>" } else { "=" },
                        self.ctx.dialect.literal(&other)
                    ))
                }
            };
        }
        match seg.value {
            Some(Value::Bool(b)) => Ok(if b { "TRUE" } else { "FALSE" }.to_string()),
            _ => Err(Error::unsupported(
                "expression does not form a boolean condition",
            )),
        }
    }

    fn visit_member(&mut self, base: &Expr, member: &str) -> Result<SqlSegment> {
        // Grouping keys pass their rendered text through unchanged.
        if matches!(base, Expr::Grouping) {
            let sql = self
                .group_fields
                .iter()
                .find(|g| g.member == member)
                .map(|g| g.sql.clone())
                .ok_or_else(|| {
                    Error::unsupported(format!(
                        "'{member}' is not one of the current grouping keys"
                    ))
                })?;
            return Ok(SqlSegment {
                sql: Some(sql),
                has_field: true,
                member: Some(member.to_string()),
                ..Default::default()
            });
        }
        let base_seg = self.visit(base)?;
        if base_seg.entity_ref {
            let table = base_seg
                .table
                .ok_or_else(|| Error::unsupported("unbound table reference"))?;
            return self.binding_member(table, member);
        }
        // Scalar pseudo-members (Length, Year, ...) route through the dialect.
        if let Some(scalar) = base_seg.scalar {
            let mut seg = base_seg;
            self.render(&mut seg)?;
            let base_text = seg.sql.clone().unwrap_or_default();
            if let Some(sql) = self.ctx.dialect.format_member(scalar, member, &base_text) {
                return Ok(
                    SqlSegment::expression(sql, seg.has_field).with_scalar(accessor_scalar(member))
                );
            }
            return Err(Error::unsupported(format!(
                "member '{member}' on a {} expression",
                scalar.name()
            )));
        }
        Err(Error::unsupported(format!(
            "member '{member}' on an untyped expression"
        )))
    }

    /// Resolve a member against a table binding: a projected sub-query
    /// column, a registered navigation, or a mapped column.
    fn binding_member(&mut self, table: TableId, member: &str) -> Result<SqlSegment> {
        let (entity, path, has_body) = {
            let b = &self.tables[table];
            (b.entity.clone(), b.path.clone(), b.body.is_some())
        };
        if has_body {
            fn projects(fields: &[ResultField], member: &str) -> bool {
                fields.iter().any(|f| match f.kind {
                    FieldKind::Scalar => f.target_member == member,
                    _ => projects(&f.children, member),
                })
            }
            if !projects(&self.tables[table].fields, member) {
                return Err(Error::unsupported(format!(
                    "'{member}' is not projected by sub-query '{path}'"
                )));
            }
            self.mark_used(table);
            let qualifier = self.qualify(table);
            let column = self.ctx.dialect.quote(member);
            return Ok(SqlSegment::column(
                format!("{qualifier}{column}"),
                table,
                member,
                None,
                false,
            ));
        }
        let schema = self.ctx.schema.clone();
        let map = schema.entity(&entity)?;
        let def = map.require_member(member)?;
        if def.is_navigation() {
            let child_path = format!("{path}.{member}");
            return match self.find_by_path(&child_path) {
                Some(id) => {
                    self.mark_used(id);
                    Ok(SqlSegment::entity(id))
                }
                None => Err(Error::not_included(child_path)),
            };
        }
        let (column, scalar, nullable) = (def.column.clone(), def.scalar, def.nullable);
        self.mark_used(table);
        let qualifier = self.qualify(table);
        let quoted = self.ctx.dialect.quote(&column);
        Ok(SqlSegment::column(
            format!("{qualifier}{quoted}"),
            table,
            member,
            scalar,
            nullable,
        ))
    }

    fn visit_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<SqlSegment> {
        match op {
            UnaryOp::Not => {
                let mut seg = self.visit(operand)?;
                if seg.has_field && !seg.is_expression {
                    seg.push_not();
                    return Ok(seg);
                }
                if seg.is_expression {
                    let text = seg.sql.take().unwrap_or_default();
                    return Ok(SqlSegment::expression(
                        format!("NOT({text})"),
                        seg.has_field,
                    ));
                }
                match seg.value {
                    Some(Value::Bool(b)) => Ok(SqlSegment::literal(Value::Bool(!b))),
                    _ => Err(Error::unsupported(
                        "logical NOT over a non-boolean operand",
                    )),
                }
            }
            UnaryOp::Neg => {
                let mut seg = self.visit(operand)?;
                match seg.value {
                    Some(Value::Int32(i)) => return Ok(SqlSegment::literal(Value::Int32(-i))),
                    Some(Value::Int64(i)) => return Ok(SqlSegment::literal(Value::Int64(-i))),
                    Some(Value::Float32(f)) => return Ok(SqlSegment::literal(Value::Float32(-f))),
                    Some(Value::Float64(f)) => return Ok(SqlSegment::literal(Value::Float64(-f))),
                    _ => {}
                }
                self.render(&mut seg)?;
                let text = wrap_operand(&seg);
                let scalar = seg.scalar;
                Ok(SqlSegment::expression(format!("-{text}"), seg.has_field)
                    .with_scalar(scalar)
                    .as_infix())
            }
        }
    }

    fn visit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<SqlSegment> {
        if op.is_logical() {
            return self.visit_logical(op, left, right);
        }
        if op.is_comparison() {
            return self.visit_comparison(op, left, right);
        }
        if op == BinaryOp::Coalesce {
            let mut lseg = self.visit(left)?;
            self.render(&mut lseg)?;
            let mut rseg = self.visit(right)?;
            self.render(&mut rseg)?;
            let scalar = lseg.scalar.or(rseg.scalar);
            return Ok(SqlSegment::expression(
                format!("COALESCE({},{})", lseg.text(), rseg.text()),
                lseg.has_field || rseg.has_field,
            )
            .with_scalar(scalar));
        }
        self.visit_arithmetic(op, left, right)
    }

    /// Flatten an AND/OR chain iteratively. Parentheses open only where the
    /// operator changes, so `a AND b AND c` stays flat while
    /// `(a AND b) OR (c AND d)` nests one level per alternation.
    fn visit_logical(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<SqlSegment> {
        enum Item<'e> {
            Node(&'e Expr, BinaryOp),
            Text(&'static str),
        }
        let mut out = String::new();
        let mut has_field = false;
        let mut work: Vec<Item> = vec![
            Item::Node(right, op),
            Item::Text(self.ctx.dialect.operator(op)),
            Item::Node(left, op),
        ];
        while let Some(item) = work.pop() {
            match item {
                Item::Text(text) => out.push_str(text),
                Item::Node(expr, context) => match expr {
                    Expr::Binary {
                        op: node_op,
                        left,
                        right,
                    } if node_op.is_logical() => {
                        let token = self.ctx.dialect.operator(*node_op);
                        if *node_op == context {
                            work.push(Item::Node(right, context));
                            work.push(Item::Text(token));
                            work.push(Item::Node(left, context));
                        } else {
                            work.push(Item::Text(")"));
                            work.push(Item::Node(right, *node_op));
                            work.push(Item::Text(token));
                            work.push(Item::Node(left, *node_op));
                            work.push(Item::Text("("));
                        }
                    }
                    leaf => {
                        let seg = self.visit(leaf)?;
                        has_field |= seg.has_field;
                        out.push_str(&self.condition_text(seg)?);
                    }
                },
            }
        }
        Ok(SqlSegment::expression(out, has_field).as_infix())
    }

    fn visit_comparison(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<SqlSegment> {
        let mut lseg = self.visit(left)?;
        let mut rseg = self.visit(right)?;
        // Normalize: the field-backed operand renders first.
        let mut op = op;
        if !lseg.has_field && rseg.has_field {
            std::mem::swap(&mut lseg, &mut rseg);
            op = op.mirrored();
        }
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            // Boolean-literal comparisons fold into the deferred stack.
            if let Some(Value::Bool(b)) = rseg.value {
                if lseg.has_field
                    && !lseg.is_expression
                    && (lseg.scalar == Some(ScalarType::Bool) || !lseg.deferred.is_empty())
                {
                    if lseg.deferred.is_empty() {
                        lseg.push_equal(Value::Bool(b));
                        if op == BinaryOp::Ne {
                            lseg.push_not();
                        }
                    } else {
                        // The stack already encodes a boolean; comparing to a
                        // literal only affects polarity.
                        if !b {
                            lseg.push_not();
                        }
                        if op == BinaryOp::Ne {
                            lseg.push_not();
                        }
                    }
                    return Ok(lseg);
                }
            }
            // NULL comparisons rewrite to the IS [NOT] NULL form.
            if matches!(rseg.value, Some(Value::Null)) {
                let has_field = lseg.has_field;
                self.render(&mut lseg)?;
                return Ok(SqlSegment::expression(
                    format!(
                        "{} IS {}NULL",
                        lseg.text(),
                        if op == BinaryOp::Ne { "NOT " } else { "" }
                    ),
                    has_field,
                )
                .as_infix());
            }
        }
        let has_field = lseg.has_field || rseg.has_field;
        self.render(&mut lseg)?;
        self.render(&mut rseg)?;
        let ltext = wrap_operand(&lseg);
        let rtext = wrap_operand(&rseg);
        Ok(SqlSegment::expression(
            format!("{ltext}{}{rtext}", self.ctx.dialect.operator(op)),
            has_field,
        )
        .as_infix())
    }

    fn visit_arithmetic(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<SqlSegment> {
        let mut lseg = self.visit(left)?;
        let mut rseg = self.visit(right)?;
        let text_operand = lseg.scalar == Some(ScalarType::String)
            || rseg.scalar == Some(ScalarType::String);
        // Addition over text concatenates.
        if op == BinaryOp::Add && text_operand {
            self.render(&mut lseg)?;
            self.render(&mut rseg)?;
            let parts = vec![lseg.text().to_string(), rseg.text().to_string()];
            return Ok(SqlSegment::expression(
                self.ctx.dialect.concat(&parts),
                lseg.has_field || rseg.has_field,
            )
            .with_scalar(Some(ScalarType::String)));
        }
        // Subtraction over timestamps becomes a date difference in seconds.
        if op == BinaryOp::Sub
            && lseg.scalar == Some(ScalarType::Timestamp)
            && rseg.scalar == Some(ScalarType::Timestamp)
        {
            self.render(&mut lseg)?;
            self.render(&mut rseg)?;
            return Ok(SqlSegment::expression(
                self.ctx.dialect.date_diff(lseg.text(), rseg.text()),
                lseg.has_field || rseg.has_field,
            )
            .with_scalar(Some(ScalarType::Int64)));
        }
        let has_field = lseg.has_field || rseg.has_field;
        self.render(&mut lseg)?;
        self.render(&mut rseg)?;
        let scalar = lseg.scalar.or(rseg.scalar);
        let ltext = wrap_operand(&lseg);
        let rtext = wrap_operand(&rseg);
        Ok(SqlSegment::expression(
            format!("{ltext}{}{rtext}", self.ctx.dialect.operator(op)),
            has_field,
        )
        .with_scalar(scalar)
        .as_infix())
    }

    fn visit_call(&mut self, call: &CallExpr) -> Result<SqlSegment> {
        if call.method.is_aggregate() {
            if matches!(self.clause, Clause::Where | Clause::On) {
                return Err(Error::unsupported(format!(
                    "aggregate '{}' is not allowed in a {} clause",
                    call.method.name(),
                    self.clause.label()
                )));
            }
            return self.visit_aggregate(call);
        }
        match call.method {
            Method::IsSome => {
                let target = call.target.as_deref().ok_or_else(|| {
                    Error::unsupported("is_some() requires a member receiver")
                })?;
                let mut seg = self.visit(target)?;
                if !seg.has_field || seg.is_expression {
                    return Err(Error::unsupported("is_some() applies to a mapped column"));
                }
                seg.push_equal(Value::Null);
                seg.push_not();
                Ok(seg)
            }
            Method::Contains | Method::StartsWith | Method::EndsWith => {
                let target = call.target.as_deref().ok_or_else(|| {
                    Error::unsupported(format!("{}() requires a receiver", call.method.name()))
                })?;
                let needle = call.args.first().ok_or_else(|| {
                    Error::unsupported(format!("{}() takes one argument", call.method.name()))
                })?;
                self.visit_like(call.method, target, needle)
            }
            method => {
                let mut has_field = false;
                let mut target_scalar = None;
                let target_text = match call.target.as_deref() {
                    Some(t) => {
                        let mut seg = self.visit(t)?;
                        self.render(&mut seg)?;
                        has_field |= seg.has_field;
                        target_scalar = seg.scalar;
                        Some(seg.sql.take().unwrap_or_default())
                    }
                    None => None,
                };
                let mut args = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    let mut seg = self.visit(arg)?;
                    self.render(&mut seg)?;
                    has_field |= seg.has_field;
                    args.push(seg.sql.take().unwrap_or_default());
                }
                let sql = self
                    .ctx
                    .dialect
                    .format_method(method, target_text.as_deref(), &args)
                    .ok_or_else(|| Error::UnsupportedMethod {
                        method: method.name().to_string(),
                        dialect: self.ctx.dialect.name(),
                    })?;
                let scalar = match method {
                    Method::ToUpper
                    | Method::ToLower
                    | Method::Trim
                    | Method::TrimStart
                    | Method::TrimEnd
                    | Method::Substring
                    | Method::Replace => Some(ScalarType::String),
                    Method::Abs | Method::Ceiling | Method::Floor | Method::Round => target_scalar,
                    _ => None,
                };
                Ok(SqlSegment::expression(sql, has_field).with_scalar(scalar))
            }
        }
    }

    fn visit_aggregate(&mut self, call: &CallExpr) -> Result<SqlSegment> {
        let arg = call.args.first().or(call.target.as_deref());
        let (text, scalar) = match arg {
            Some(expr) => {
                let mut seg = self.visit(expr)?;
                self.render(&mut seg)?;
                (seg.sql.take().unwrap_or_default(), seg.scalar)
            }
            None => (String::new(), None),
        };
        let (sql, scalar) = match call.method {
            Method::Count if text.is_empty() => ("COUNT(*)".to_string(), Some(ScalarType::Int64)),
            Method::Count => (format!("COUNT({text})"), Some(ScalarType::Int64)),
            Method::CountDistinct => {
                if text.is_empty() {
                    return Err(Error::unsupported("count_distinct() takes one argument"));
                }
                (format!("COUNT(DISTINCT {text})"), Some(ScalarType::Int64))
            }
            method => {
                if text.is_empty() {
                    return Err(Error::unsupported(format!(
                        "{}() takes one argument",
                        method.name()
                    )));
                }
                let token = match method {
                    Method::Sum => "SUM",
                    Method::Avg => "AVG",
                    Method::Max => "MAX",
                    _ => "MIN",
                };
                (format!("{token}({text})"), scalar)
            }
        };
        Ok(SqlSegment::expression(sql, true).with_scalar(scalar))
    }

    /// Rewrite `contains`/`starts_with`/`ends_with` into a LIKE test.
    /// Constant needles fold into the bound pattern; field-backed needles
    /// concatenate wildcards through the dialect.
    fn visit_like(&mut self, method: Method, target: &Expr, needle: &Expr) -> Result<SqlSegment> {
        let mut tseg = self.visit(target)?;
        self.render(&mut tseg)?;
        let ttext = tseg.sql.clone().unwrap_or_default();
        let nseg = self.visit(needle)?;
        if let Some(Value::String(s)) = &nseg.value {
            let pattern = match method {
                Method::Contains => format!("%{s}%"),
                Method::StartsWith => format!("{s}%"),
                _ => format!("%{s}"),
            };
            let placeholder = self.add_param(Value::String(pattern));
            return Ok(SqlSegment::expression(
                format!("{ttext} LIKE {placeholder}"),
                tseg.has_field,
            ));
        }
        let mut nseg = nseg;
        self.render(&mut nseg)?;
        let ntext = nseg.sql.take().unwrap_or_default();
        let pct = "'%'".to_string();
        let parts = match method {
            Method::Contains => vec![pct.clone(), ntext, pct],
            Method::StartsWith => vec![ntext, pct],
            _ => vec![pct, ntext],
        };
        Ok(SqlSegment::expression(
            format!("{ttext} LIKE {}", self.ctx.dialect.concat(&parts)),
            tseg.has_field || nseg.has_field,
        ))
    }

    fn visit_in(&mut self, target: &Expr, list: &InList, negated: bool) -> Result<SqlSegment> {
        let mut tseg = self.visit(target)?;
        self.render(&mut tseg)?;
        let ttext = tseg.sql.clone().unwrap_or_default();
        let has_field = tseg.has_field;
        let keyword = if negated { " NOT IN " } else { " IN " };
        let parts: Vec<String> = match list {
            InList::Values(values) => {
                if values.is_empty() {
                    // Vacuous membership never matches.
                    let text = if negated { "1=1" } else { "1=0" };
                    return Ok(SqlSegment::expression(text.to_string(), has_field));
                }
                values.iter().map(|v| self.add_param(v.clone())).collect()
            }
            InList::Exprs(exprs) => {
                if exprs.is_empty() {
                    let text = if negated { "1=1" } else { "1=0" };
                    return Ok(SqlSegment::expression(text.to_string(), has_field));
                }
                let mut parts = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    let mut seg = self.visit(expr)?;
                    self.render(&mut seg)?;
                    parts.push(seg.sql.take().unwrap_or_default());
                }
                parts
            }
            InList::Query(sq) => {
                let inner = self.subquery_text(sq)?;
                return Ok(SqlSegment::expression(
                    format!("{ttext}{keyword}{inner}"),
                    has_field,
                ));
            }
        };
        Ok(SqlSegment::expression(
            format!("{ttext}{keyword}({})", parts.join(",")),
            has_field,
        ))
    }

    /// Correlated EXISTS. The probed entity binds for the duration of the
    /// predicate and retires afterwards; aliasing turns on permanently so
    /// outer references stay qualified inside the sub-select.
    fn visit_exists(&mut self, entity: &str, predicate: &Expr, negated: bool) -> Result<SqlSegment> {
        let schema = self.ctx.schema.clone();
        let map = schema.entity(entity)?;
        let table = map.table.clone();
        let alias = self.next_alias();
        let path = self.unique_path(entity);
        self.force_alias = true;
        let id = self.add_binding(TableBinding::root(entity, table.clone(), alias.clone(), path));
        self.param_tables.push(id);
        let previous = std::mem::replace(&mut self.clause, Clause::Where);
        let condition = self.condition(predicate);
        self.clause = previous;
        self.param_tables.pop();
        self.tables[id].in_from = false;
        let condition = condition?;
        let quoted = self.ctx.dialect.quote(&table);
        let keyword = if negated { "NOT EXISTS" } else { "EXISTS" };
        Ok(SqlSegment::expression(
            format!("{keyword}(SELECT * FROM {quoted} {alias} WHERE {condition})"),
            true,
        ))
    }

    fn visit_conditional(
        &mut self,
        test: &Expr,
        if_true: &Expr,
        if_false: &Expr,
    ) -> Result<SqlSegment> {
        let test_seg = self.visit(test)?;
        let test_field = test_seg.has_field;
        let test_text = self.condition_text(test_seg)?;
        let mut t = self.visit(if_true)?;
        self.render(&mut t)?;
        let mut f = self.visit(if_false)?;
        self.render(&mut f)?;
        let scalar = t.scalar.or(f.scalar);
        Ok(SqlSegment::expression(
            format!("CASE WHEN {test_text} THEN {} ELSE {} END", t.text(), f.text()),
            test_field || t.has_field || f.has_field,
        )
        .with_scalar(scalar))
    }

    /// Indexers constant-fold against captured collections.
    fn visit_index(&mut self, base: &Expr, index: usize) -> Result<SqlSegment> {
        if let Expr::Collection(items) = base {
            let item = items.get(index).ok_or_else(|| {
                Error::unsupported(format!(
                    "index {index} is out of range for a collection of {}",
                    items.len()
                ))
            })?;
            return self.visit(item);
        }
        let seg = self.visit(base)?;
        match seg.value {
            Some(Value::List(items)) => {
                let len = items.len();
                items
                    .into_iter()
                    .nth(index)
                    .map(SqlSegment::literal)
                    .ok_or_else(|| {
                        Error::unsupported(format!(
                            "index {index} is out of range for a captured collection of {len}"
                        ))
                    })
            }
            _ => Err(Error::unsupported(
                "indexer over a non-collection expression",
            )),
        }
    }

    /// Replay an embedded sub-query on a fresh assembler. The child gets its
    /// own alias sequence; parameter numbering continues from this statement
    /// and the child's bindings merge back in.
    pub(crate) fn subquery_text(&mut self, sq: &Subquery) -> Result<String> {
        let base = self.param_base + self.params.len();
        let child = QueryBuilder::nested(self.ctx.clone(), self.param_prefix.clone(), base);
        let inline = child.replay(sq)?;
        self.params.extend(inline.params);
        Ok(format!("({})", inline.sql))
    }
}

/// Parenthesize operator-joined operands so precedence survives
/// re-concatenation. Atomic text (columns, function calls, already-wrapped
/// sub-queries) passes through.
fn wrap_operand(seg: &SqlSegment) -> String {
    let text = seg.text();
    if seg.infix && !text.starts_with('(') {
        format!("({text})")
    } else {
        text.to_string()
    }
}

fn accessor_scalar(member: &str) -> Option<ScalarType> {
    match member {
        "Length" | "Year" | "Month" | "Day" | "Hour" | "Minute" | "Second" => {
            Some(ScalarType::Int32)
        }
        "Date" => Some(ScalarType::Timestamp),
        _ => None,
    }
}
