//! Second-pass include fetches.
//!
//! One-to-many navigations never join into the first statement. Each
//! used segment turns into its own fetch, `SELECT cols FROM target
//! WHERE fk IN (keys...)`, and a cached binder distributes the fetched
//! rows back onto the root records. The header text, the key appender,
//! and the binder all cache by structural fingerprints so repeated
//! statements of the same shape share them.

use std::hash::Hash;
use std::sync::Arc;

use relq_expr::Value;

use crate::error::{Error, Result};
use crate::row::{EntityRecord, Materializer, RecordValue, RowCursor};

use super::cache::{self, APPENDERS, BINDERS, FETCH_SQL};
use super::field::{FieldKind, ResultField, ResultShape};
use super::segment::SqlParam;
use super::table::TableId;
use super::walker::QueryContext;

/// A registered one-to-many navigation awaiting its fetch.
#[derive(Debug, Clone)]
pub(crate) struct IncludeSegment {
    /// Navigation path from the root, e.g. `Order.Details`.
    pub path: String,
    /// Binding of the owning entity.
    pub owner: TableId,
    pub owner_entity: String,
    /// The segment's own pending binding; its used flag decides whether
    /// the fetch happens at all.
    pub binding: TableId,
    pub target_entity: String,
    /// Foreign-key member on the target, equating to the owner's key.
    pub foreign_key: String,
    pub filter_sql: Option<String>,
    pub filter_params: Vec<SqlParam>,
}

/// A rendered include fetch, one per used one-to-many segment.
#[derive(Debug, Clone)]
pub struct IncludeStatement {
    /// Navigation path the fetched rows attach to.
    pub path: String,
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Appends root key literals into a fetch's IN list.
pub(crate) type KeyAppender = dyn Fn(&[EntityRecord], &mut String) + Send + Sync;

/// Grafts include result sets onto root records.
pub(crate) type IncludeBinder =
    dyn Fn(&mut [EntityRecord], &mut dyn RowCursor) -> Result<()> + Send + Sync;

/// The constant head of a segment's fetch, up to and including `IN (`.
pub(crate) fn fetch_header(
    ctx: &QueryContext,
    entity: &str,
    fk_member: &str,
) -> Result<Arc<str>> {
    let map = ctx.schema.entity(entity)?;
    let fk_column = &map.require_member(fk_member)?.column;
    let key = cache::fingerprint(|hasher| {
        ctx.dialect.name().hash(hasher);
        ctx.schema.generation().hash(hasher);
        entity.hash(hasher);
        fk_member.hash(hasher);
    });
    Ok(FETCH_SQL.get_or_insert_with(key, || {
        let mut columns = String::new();
        for (i, def) in map.columns().enumerate() {
            if i > 0 {
                columns.push(',');
            }
            columns.push_str(&ctx.dialect.quote(&def.column));
        }
        format!(
            "SELECT {columns} FROM {} WHERE {} IN (",
            ctx.dialect.quote(&map.table),
            ctx.dialect.quote(fk_column),
        )
    }))
}

/// The cached closure that renders a segment's IN-list keys from root
/// records. Null keys skip; an empty batch appends `NULL` so the list
/// stays syntactically valid and matches nothing.
pub(crate) fn key_appender(
    ctx: &QueryContext,
    shape: &ResultShape,
    seg: &IncludeSegment,
) -> Result<Arc<KeyAppender>> {
    let chain = owner_chain(shape, seg.owner).ok_or_else(|| {
        Error::unsupported(format!(
            "include '{}' requires its owner entity in the projection",
            seg.path
        ))
    })?;
    let key_member = ctx
        .schema
        .entity(&seg.owner_entity)?
        .single_key()?
        .member
        .clone();
    let key = cache::fingerprint(|hasher| {
        ctx.dialect.name().hash(hasher);
        shape.fingerprint().hash(hasher);
        seg.path.hash(hasher);
        key_member.hash(hasher);
    });
    if let Some(hit) = APPENDERS.get(key) {
        return Ok(hit);
    }
    let dialect = ctx.dialect.clone();
    let appender: Arc<KeyAppender> = Arc::new(move |roots, out| {
        let mut first = true;
        for root in roots {
            let Some(value) = chain_scalar(root, &chain, &key_member) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str(&dialect.literal(&value));
        }
        if first {
            out.push_str("NULL");
        }
    });
    Ok(APPENDERS.insert(key, appender))
}

struct BindStep {
    chain: Vec<String>,
    nav_member: String,
    key_member: String,
    fk_member: String,
    reader: Arc<Materializer>,
}

/// The cached closure that reads one result set per segment (in
/// registration order) and attaches the rows. `single` mode assigns all
/// rows of a set to the lone root; batch mode distributes them by
/// matching the target's foreign key against each root's key.
pub(crate) fn include_binder(
    ctx: &QueryContext,
    shape: &ResultShape,
    segments: &[&IncludeSegment],
    single: bool,
) -> Result<Arc<IncludeBinder>> {
    let key = cache::fingerprint(|hasher| {
        ctx.dialect.name().hash(hasher);
        ctx.schema.generation().hash(hasher);
        shape.fingerprint().hash(hasher);
        single.hash(hasher);
        for seg in segments {
            seg.path.hash(hasher);
        }
    });
    if let Some(hit) = BINDERS.get(key) {
        return Ok(hit);
    }
    let mut steps = Vec::with_capacity(segments.len());
    for seg in segments {
        let chain = owner_chain(shape, seg.owner).ok_or_else(|| {
            Error::unsupported(format!(
                "include '{}' requires its owner entity in the projection",
                seg.path
            ))
        })?;
        let key_member = ctx
            .schema
            .entity(&seg.owner_entity)?
            .single_key()?
            .member
            .clone();
        let nav_member = seg
            .path
            .rsplit('.')
            .next()
            .unwrap_or(seg.path.as_str())
            .to_string();
        steps.push(BindStep {
            chain,
            nav_member,
            key_member,
            fk_member: seg.foreign_key.clone(),
            reader: entity_reader(ctx, &seg.target_entity)?,
        });
    }
    let binder: Arc<IncludeBinder> = Arc::new(move |roots, cursor| {
        for (idx, step) in steps.iter().enumerate() {
            if idx > 0 && !cursor.next_result()? {
                return Err(Error::cursor(format!(
                    "missing result set for include '{}'",
                    step.nav_member
                )));
            }
            let rows = step.reader.read_rows(cursor)?;
            if single {
                let root = roots
                    .first_mut()
                    .ok_or_else(|| Error::cursor("no root record to attach includes to"))?;
                // An empty set leaves the navigation member untouched.
                if !rows.is_empty() {
                    if let Some(owner) = chain_record_mut(root, &step.chain) {
                        owner.set(&step.nav_member, RecordValue::Records(rows));
                    }
                }
            } else {
                distribute(roots, step, &rows);
            }
        }
        Ok(())
    });
    Ok(BINDERS.insert(key, binder))
}

fn distribute(roots: &mut [EntityRecord], step: &BindStep, rows: &[EntityRecord]) {
    for root in roots.iter_mut() {
        let Some(owner) = chain_record_mut(root, &step.chain) else {
            continue;
        };
        let key = match owner.scalar(&step.key_member) {
            Some(value) if !value.is_null() => value.clone(),
            _ => {
                owner.set(&step.nav_member, RecordValue::Records(Vec::new()));
                continue;
            }
        };
        let matched: Vec<EntityRecord> = rows
            .iter()
            .filter(|row| row.scalar(&step.fk_member) == Some(&key))
            .cloned()
            .collect();
        owner.set(&step.nav_member, RecordValue::Records(matched));
    }
}

/// Cached whole-entity reader for include fetches: every mapped column,
/// in map order.
fn entity_reader(ctx: &QueryContext, entity: &str) -> Result<Arc<Materializer>> {
    let map = ctx.schema.entity(entity)?;
    let mut fields = Vec::new();
    for def in map.columns() {
        let mut leaf = ResultField::scalar(ctx.dialect.quote(&def.column), def.member.clone());
        leaf.key = def.key;
        fields.push(leaf);
    }
    Ok(Materializer::cached(entity, &ResultShape::new(fields)))
}

/// Record path from the shape root down to the owner binding's record.
/// Empty when the owner's columns sit flat at the root.
fn owner_chain(shape: &ResultShape, owner: TableId) -> Option<Vec<String>> {
    let flat_at_root = shape
        .fields
        .iter()
        .any(|f| f.kind == FieldKind::Scalar && f.table == Some(owner));
    if flat_at_root {
        return Some(Vec::new());
    }
    let mut path = Vec::new();
    if descend(&shape.fields, owner, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn descend(fields: &[ResultField], owner: TableId, path: &mut Vec<String>) -> bool {
    for field in fields {
        match field.kind {
            FieldKind::Entity if field.table == Some(owner) => {
                path.push(field.target_member.clone());
                return true;
            }
            FieldKind::Entity | FieldKind::Bundle => {
                path.push(field.target_member.clone());
                if descend(&field.children, owner, path) {
                    return true;
                }
                path.pop();
            }
            FieldKind::Scalar => {}
        }
    }
    false
}

fn chain_record<'r>(record: &'r EntityRecord, chain: &[String]) -> Option<&'r EntityRecord> {
    let mut current = record;
    for step in chain {
        match current.get(step)? {
            RecordValue::Record(next) => current = next,
            _ => return None,
        }
    }
    Some(current)
}

fn chain_record_mut<'r>(
    record: &'r mut EntityRecord,
    chain: &[String],
) -> Option<&'r mut EntityRecord> {
    let mut current = record;
    for step in chain {
        match current.get_mut(step)? {
            RecordValue::Record(next) => current = next,
            _ => return None,
        }
    }
    Some(current)
}

fn chain_scalar(record: &EntityRecord, chain: &[String], member: &str) -> Option<Value> {
    chain_record(record, chain)?.scalar(member).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape_with_nested_owner() -> ResultShape {
        let id = ResultField::scalar("a.Id".into(), "Id");
        let mut buyer_id = ResultField::scalar("b.Id".into(), "Id");
        buyer_id.table = Some(1);
        buyer_id.key = true;
        let buyer = ResultField::entity("Buyer", 1, vec![buyer_id]).of_entity("User");
        ResultShape::new(vec![id, buyer])
    }

    #[test]
    fn test_owner_chain_flat_and_nested() {
        let mut id = ResultField::scalar("Id".into(), "Id");
        id.table = Some(0);
        let flat = ResultShape::new(vec![id]);
        assert_eq!(owner_chain(&flat, 0), Some(vec![]));

        let nested = shape_with_nested_owner();
        assert_eq!(owner_chain(&nested, 1), Some(vec!["Buyer".to_string()]));
        assert_eq!(owner_chain(&nested, 9), None);
    }

    #[test]
    fn test_chain_navigation() {
        let mut buyer = EntityRecord::new("User");
        buyer.set("Id", RecordValue::Scalar(Value::Int32(4)));
        let mut root = EntityRecord::new("Order");
        root.set("Buyer", RecordValue::Record(buyer));

        let chain = vec!["Buyer".to_string()];
        assert_eq!(chain_scalar(&root, &chain, "Id"), Some(Value::Int32(4)));
        assert_eq!(chain_scalar(&root, &chain, "Missing"), None);

        // A null owner cuts the chain.
        root.set("Buyer", RecordValue::Scalar(Value::Null));
        assert_eq!(chain_scalar(&root, &chain, "Id"), None);
    }
}
