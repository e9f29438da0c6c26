//! SQL dialect contract and built-in dialects.
//!
//! The compiler is dialect-agnostic: every piece of vendor-specific text
//! (identifier quoting, parameter placeholders, literal formatting, scalar
//! functions, pagination) goes through the [`Dialect`] trait. Formatters
//! receive already-rendered argument text; they never see expression trees.

mod mysql;
mod postgres;

use std::fmt::Write as _;

use relq_expr::{BinaryOp, Method, Value};

use crate::schema::ScalarType;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;

/// Words that force identifier quoting even when the identifier is plain.
const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "by", "case", "delete", "desc", "distinct", "end", "from", "group",
    "having", "index", "inner", "insert", "into", "join", "key", "left", "limit", "not", "null",
    "offset", "on", "or", "order", "right", "select", "set", "table", "then", "union", "update",
    "user", "values", "when", "where",
];

/// True when `ident` can appear unquoted: a plain identifier that is not a
/// reserved word.
pub(crate) fn plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    let plain = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    plain && !RESERVED.contains(&ident.to_ascii_lowercase().as_str())
}

/// Single-quote a string literal, doubling embedded quotes.
pub(crate) fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Format a 16-byte UUID in its hyphenated lowercase form.
pub(crate) fn format_uuid(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Vendor-specific SQL formatting.
///
/// Member accessors recognize PascalCase pseudo-members on scalar receivers:
/// `Length` on strings, `Year`/`Month`/`Day`/`Hour`/`Minute`/`Second`/`Date`
/// on timestamps. A `None` from [`format_member`](Dialect::format_member) or
/// [`format_method`](Dialect::format_method) means the dialect cannot
/// translate the access, which the compiler reports as an unsupported shape.
pub trait Dialect: Send + Sync {
    /// Dialect name for diagnostics and cache keys.
    fn name(&self) -> &'static str;

    /// The quote pair for identifiers that need quoting.
    fn quote_pair(&self) -> (char, char);

    /// A parameter placeholder. `ordinal` is the zero-based position within
    /// the statement; `name` is the logical parameter name (`p0`, or a
    /// member name for insert projections).
    fn placeholder(&self, ordinal: usize, name: &str) -> String;

    /// Render a binary literal.
    fn binary_literal(&self, bytes: &[u8]) -> String;

    /// String concatenation over two or more rendered parts.
    fn concat(&self, parts: &[String]) -> String;

    /// Difference of two rendered timestamps, in seconds.
    fn date_diff(&self, left: &str, right: &str) -> String;

    /// A scalar pseudo-member access, or `None` when unknown.
    fn format_member(&self, scalar: ScalarType, member: &str, base: &str) -> Option<String>;

    /// A scalar function call, or `None` when unknown. `target` and `args`
    /// are already rendered.
    fn format_method(&self, method: Method, target: Option<&str>, args: &[String])
        -> Option<String>;

    /// The pagination statement template. The returned text keeps the
    /// `/**fields**/`, `/**tables**/`, and `/**others**/` slots for the
    /// assembler to substitute; `order_by` is folded into the template.
    fn page_template(&self, skip: Option<u64>, take: Option<u64>, order_by: Option<&str>)
        -> String;

    /// Quote an identifier only when it needs it.
    fn quote(&self, ident: &str) -> String {
        if plain_identifier(ident) {
            ident.to_string()
        } else {
            let (open, close) = self.quote_pair();
            format!("{open}{ident}{close}")
        }
    }

    /// The SQL token for a binary operator.
    ///
    /// Logical operators are spaced; arithmetic and comparison operators
    /// render compactly. `Coalesce` never reaches this table.
    fn operator(&self, op: BinaryOp) -> &'static str {
        match op {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::And => " AND ",
            BinaryOp::Or => " OR ",
            BinaryOp::Coalesce => "COALESCE",
        }
    }

    /// Render an inline literal.
    ///
    /// Strings quote with `''` doubling, timestamps render as their
    /// microsecond count, lists as a comma-joined element sequence. The
    /// compiler parameterizes strings, bytes, timestamps, and UUIDs in
    /// ordinary positions; literals appear inline only for bool/int/float
    /// constants and inside include-fetch `IN` lists.
    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int32(i) => i.to_string(),
            Value::Int64(i) => i.to_string(),
            Value::Float32(f) => f.to_string(),
            Value::Float64(f) => f.to_string(),
            Value::String(s) => quote_str(s),
            Value::Bytes(b) => self.binary_literal(b),
            Value::Timestamp(t) => t.to_string(),
            Value::Uuid(u) => quote_str(&format_uuid(u)),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| self.literal(v)).collect();
                parts.join(",")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_identifier() {
        assert!(plain_identifier("BuyerId"));
        assert!(plain_identifier("sys_order"));
        assert!(plain_identifier("_tmp1"));
        assert!(!plain_identifier("2fast"));
        assert!(!plain_identifier("has space"));
        assert!(!plain_identifier("Order")); // reserved word
        assert!(!plain_identifier("from"));
    }

    #[test]
    fn test_quote_str_doubles_quotes() {
        assert_eq!(quote_str("Kevin"), "'Kevin'");
        assert_eq!(quote_str("O'Neil"), "'O''Neil'");
    }

    #[test]
    fn test_format_uuid() {
        let uuid = [
            0x01, 0x92, 0x30, 0xab, 0x4c, 0x5d, 0x7e, 0x8f, 0x90, 0x01, 0x12, 0x23, 0x34, 0x45,
            0x56, 0x67,
        ];
        assert_eq!(format_uuid(&uuid), "019230ab-4c5d-7e8f-9001-122334455667");
    }
}
