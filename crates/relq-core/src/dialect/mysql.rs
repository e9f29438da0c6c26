//! MySQL dialect.

use std::fmt::Write as _;

use relq_expr::Method;

use crate::schema::ScalarType;

use super::Dialect;

/// MySQL formatting: backtick quoting, `@name` placeholders, `CONCAT`,
/// `LIMIT skip,take` pagination.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_pair(&self) -> (char, char) {
        ('`', '`')
    }

    fn placeholder(&self, _ordinal: usize, name: &str) -> String {
        format!("@{name}")
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        let mut out = String::with_capacity(2 + bytes.len() * 2);
        out.push_str("0x");
        for b in bytes {
            let _ = write!(out, "{b:02X}");
        }
        out
    }

    fn concat(&self, parts: &[String]) -> String {
        format!("CONCAT({})", parts.join(","))
    }

    fn date_diff(&self, left: &str, right: &str) -> String {
        format!("TIMESTAMPDIFF(SECOND,{right},{left})")
    }

    fn format_member(&self, scalar: ScalarType, member: &str, base: &str) -> Option<String> {
        match (scalar, member) {
            (ScalarType::String, "Length") => Some(format!("CHAR_LENGTH({base})")),
            (ScalarType::Timestamp, "Year") => Some(format!("YEAR({base})")),
            (ScalarType::Timestamp, "Month") => Some(format!("MONTH({base})")),
            (ScalarType::Timestamp, "Day") => Some(format!("DAY({base})")),
            (ScalarType::Timestamp, "Hour") => Some(format!("HOUR({base})")),
            (ScalarType::Timestamp, "Minute") => Some(format!("MINUTE({base})")),
            (ScalarType::Timestamp, "Second") => Some(format!("SECOND({base})")),
            (ScalarType::Timestamp, "Date") => Some(format!("DATE({base})")),
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
                [start, len] => Some(format!("SUBSTRING({t},{start}+1,{len})")),
                [start] => Some(format!("SUBSTRING({t},{start}+1)")),
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
            // LIKE rewriting, null tests, and aggregates are compiled
            // upstream, not formatted here.
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
        match (skip, take) {
            (Some(skip), Some(take)) => {
                let _ = write!(sql, " LIMIT {skip},{take}");
            }
            (None, Some(take)) => {
                let _ = write!(sql, " LIMIT {take}");
            }
            (Some(skip), None) => {
                // MySQL has no bare OFFSET; the documented idiom is an
                // all-rows LIMIT.
                let _ = write!(sql, " LIMIT {skip},18446744073709551615");
            }
            (None, None) => {}
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting_and_placeholders() {
        let d = MySqlDialect;
        assert_eq!(d.quote("BuyerId"), "BuyerId");
        assert_eq!(d.quote("order"), "`order`");
        assert_eq!(d.placeholder(0, "p0"), "@p0");
        assert_eq!(d.placeholder(3, "Name"), "@Name");
    }

    #[test]
    fn test_scalar_formatting() {
        let d = MySqlDialect;
        assert_eq!(
            d.concat(&["a.Name".into(), "'x'".into()]),
            "CONCAT(a.Name,'x')"
        );
        assert_eq!(
            d.format_member(ScalarType::String, "Length", "a.Name"),
            Some("CHAR_LENGTH(a.Name)".into())
        );
        assert_eq!(
            d.format_method(Method::Substring, Some("a.Name"), &["0".into(), "3".into()]),
            Some("SUBSTRING(a.Name,0+1,3)".into())
        );
        assert_eq!(d.format_method(Method::Contains, Some("a.Name"), &[]), None);
        assert_eq!(d.binary_literal(&[0xde, 0xad]), "0xDEAD");
    }

    #[test]
    fn test_page_template() {
        let d = MySqlDialect;
        assert_eq!(
            d.page_template(Some(20), Some(10), Some("a.Id")),
            "SELECT /**fields**/ FROM /**tables**//**others**/ ORDER BY a.Id LIMIT 20,10"
        );
        assert_eq!(
            d.page_template(None, Some(5), None),
            "SELECT /**fields**/ FROM /**tables**//**others**/ LIMIT 5"
        );
    }
}
