//! PostgreSQL dialect.

use std::fmt::Write as _;

use relq_expr::Method;

use crate::schema::ScalarType;

use super::Dialect;

/// PostgreSQL formatting: double-quote quoting, positional `$n`
/// placeholders, `||` concatenation, `LIMIT take OFFSET skip` pagination.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_pair(&self) -> (char, char) {
        ('"', '"')
    }

    fn placeholder(&self, ordinal: usize, _name: &str) -> String {
        format!("${}", ordinal + 1)
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        let mut out = String::with_capacity(6 + bytes.len() * 2);
        out.push_str("'\\x");
        for b in bytes {
            let _ = write!(out, "{b:02x}");
        }
        out.push('\'');
        out
    }

    fn concat(&self, parts: &[String]) -> String {
        parts.join("||")
    }

    fn date_diff(&self, left: &str, right: &str) -> String {
        format!("EXTRACT(EPOCH FROM {left}-{right})")
    }

    fn format_member(&self, scalar: ScalarType, member: &str, base: &str) -> Option<String> {
        match (scalar, member) {
            (ScalarType::String, "Length") => Some(format!("LENGTH({base})")),
            (ScalarType::Timestamp, "Year") => Some(format!("EXTRACT(YEAR FROM {base})")),
            (ScalarType::Timestamp, "Month") => Some(format!("EXTRACT(MONTH FROM {base})")),
            (ScalarType::Timestamp, "Day") => Some(format!("EXTRACT(DAY FROM {base})")),
            (ScalarType::Timestamp, "Hour") => Some(format!("EXTRACT(HOUR FROM {base})")),
            (ScalarType::Timestamp, "Minute") => Some(format!("EXTRACT(MINUTE FROM {base})")),
            (ScalarType::Timestamp, "Second") => Some(format!("EXTRACT(SECOND FROM {base})")),
            (ScalarType::Timestamp, "Date") => Some(format!("CAST({base} AS DATE)")),
            _ => None,
        }
    }

    fn format_method(
        &self,
        method: Method,
        target: Option<&str>,
        args: &[String],
    ) -> Option<String> {
        let t = target.unwrap_or_default();
        match method {
            Method::ToUpper => Some(format!("UPPER({t})")),
            Method::ToLower => Some(format!("LOWER({t})")),
            Method::Trim => Some(format!("TRIM({t})")),
            Method::TrimStart => Some(format!("LTRIM({t})")),
            Method::TrimEnd => Some(format!("RTRIM({t})")),
            Method::Substring => match args {
                [start, len] => Some(format!("SUBSTR({t},{start}+1,{len})")),
                [start] => Some(format!("SUBSTR({t},{start}+1)")),
                _ => None,
            },
            Method::Replace => match args {
                [from, to] => Some(format!("REPLACE({t},{from},{to})")),
                _ => None,
            },
            Method::Abs => Some(format!("ABS({t})")),
            Method::Ceiling => Some(format!("CEILING({t})")),
            Method::Floor => Some(format!("FLOOR({t})")),
            Method::Round => match args {
                [] => Some(format!("ROUND({t})")),
                [digits] => Some(format!("ROUND({t},{digits})")),
                _ => None,
            },
            _ => None,
        }
    }

    fn page_template(
        &self,
        skip: Option<u64>,
        take: Option<u64>,
        order_by: Option<&str>,
    ) -> String {
        let mut sql = String::from("SELECT /**fields**/ FROM /**tables**//**others**/");
        if let Some(order) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(take) = take {
            let _ = write!(sql, " LIMIT {take}");
        }
        if let Some(skip) = skip {
            let _ = write!(sql, " OFFSET {skip}");
        }
        sql
    }
}
