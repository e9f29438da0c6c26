//! `INSERT INTO ... SELECT` projection.

use relq_expr::{BinaryOp, Expr};

use crate::error::{Error, Result};

use super::builder::{and_append, SqlStatement};
use super::field::ResultShape;
use super::table::TableBinding;
use super::walker::{Clause, QueryContext, SqlWalker};

/// Assembles a statement that projects rows from source tables straight
/// into a target entity's table, without a round trip.
///
/// The projection is an object whose keys name target members. Keys
/// that do not map to an insertable column (unknown, ignored, or
/// navigation members) drop silently; constant values bind as
/// parameters named after their member so drivers can rebind them.
#[derive(Debug)]
pub struct InsertBuilder {
    w: SqlWalker,
    target_entity: String,
    target_table: String,
    columns: Vec<String>,
    values: Vec<String>,
    where_sql: Option<String>,
    where_or: bool,
    rendered: bool,
}

impl InsertBuilder {
    pub fn new(ctx: QueryContext, target: &str) -> Result<Self> {
        let (target_entity, target_table) = {
            let map = ctx.schema.entity(target)?;
            (map.entity.clone(), map.table.clone())
        };
        Ok(Self {
            w: SqlWalker::new(ctx),
            target_entity,
            target_table,
            columns: Vec::new(),
            values: Vec::new(),
            where_sql: None,
            where_or: false,
            rendered: false,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.rendered {
            Err(Error::invalid_state("statement already rendered"))
        } else {
            Ok(())
        }
    }

    /// Register a source table. Multiple sources cross-join.
    pub fn source(mut self, entity: &str) -> Result<Self> {
        self.ensure_open()?;
        let schema = self.w.ctx.schema.clone();
        let map = schema.entity(entity)?;
        let alias = self.w.next_alias();
        let path = self.w.unique_path(entity);
        let id = self
            .w
            .add_binding(TableBinding::root(entity, map.table.clone(), alias, path));
        self.w.param_tables.push(id);
        Ok(self)
    }

    /// Add a WHERE predicate over the sources.
    pub fn filter(mut self, predicate: &Expr) -> Result<Self> {
        self.ensure_open()?;
        if !self.w.tables.iter().any(|t| t.in_from) {
            return Err(Error::invalid_state(
                "a filter needs at least one source; call source() first",
            ));
        }
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

    /// Set the projection object.
    pub fn project(mut self, projection: &Expr) -> Result<Self> {
        self.ensure_open()?;
        let Expr::Object(members) = projection else {
            return Err(Error::unsupported("an insert projection must be an object"));
        };
        self.w.clause = Clause::Insert;
        let schema = self.w.ctx.schema.clone();
        let map = schema.entity(&self.target_entity)?;
        for (member, expr) in members {
            let Some(def) = map.member(member) else {
                continue;
            };
            if !def.is_column() {
                continue;
            }
            let column = self.w.ctx.dialect.quote(&def.column);
            let text = match expr {
                Expr::Value(value) => self.w.add_named_param(member, value.clone()),
                other => {
                    let mut seg = self.w.visit(other)?;
                    self.w.render(&mut seg)?;
                    seg.sql.take().unwrap_or_default()
                }
            };
            self.columns.push(column);
            self.values.push(text);
        }
        if self.columns.is_empty() {
            return Err(Error::unsupported(
                "insert projection has no insertable columns",
            ));
        }
        Ok(self)
    }

    /// Render the statement. Runs once.
    pub fn build(&mut self) -> Result<SqlStatement> {
        self.ensure_open()?;
        if self.columns.is_empty() {
            return Err(Error::invalid_state("no projection; call project() first"));
        }
        let has_source = self.w.tables.iter().any(|t| t.in_from);
        let mut sql = format!(
            "INSERT INTO {} ({}) SELECT {}",
            self.w.ctx.dialect.quote(&self.target_table),
            self.columns.join(","),
            self.values.join(","),
        );
        if has_source {
            sql.push_str(" FROM ");
            sql.push_str(&self.from_text());
        }
        if let Some(where_sql) = &self.where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(where_sql);
        }
        self.rendered = true;
        let params = std::mem::take(&mut self.w.params);
        tracing::debug!(
            target = %self.target_entity,
            columns = self.columns.len(),
            params = params.len(),
            "assembled insert statement"
        );
        Ok(SqlStatement {
            sql,
            params,
            shape: ResultShape::new(Vec::new()),
        })
    }

    fn from_text(&self) -> String {
        let aliases = self.w.aliases_on();
        let mut out = String::new();
        for (i, binding) in self.w.tables.iter().filter(|t| t.in_from).enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&self.w.ctx.dialect.quote(&binding.table));
            if aliases {
                out.push(' ');
                out.push_str(&binding.alias);
            }
        }
        out
    }
}
