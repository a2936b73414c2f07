//! Pure SQL formatting utilities: identifier quoting, alias rendering and
//! literal escaping. Stateless; every function is a pure function of its
//! input.

use crate::Value;

/// Quote an identifier with backticks.
///
/// Multi-part dotted identifiers quote each segment. Already-quoted
/// identifiers (backtick, double-quote or bracket delimiters matching both
/// ends), function calls and recognised expressions pass through untouched.
pub fn format_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if is_quoted(trimmed) || is_function_call(trimmed) || is_expression(trimmed) {
        return trimmed.to_string();
    }

    if trimmed.contains('.') {
        return trimmed
            .split('.')
            .map(|segment| quote_segment(segment.trim()))
            .collect::<Vec<_>>()
            .join(".");
    }

    quote_segment(trimmed)
}

/// Render `<expr> AS `alias``; the alias is always quoted.
pub fn format_alias(expr: &str, alias: &str) -> String {
    format!("{} AS {}", format_identifier(expr), quote_segment(alias))
}

/// Single-quote a string, doubling internal single quotes.
pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a value as a SQL literal.
///
/// NULL for null, `1`/`0` for booleans, bare numerics for integers and
/// finite floats, quoted strings otherwise. Binary payloads render as hex
/// literals.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.is_finite() {
                f.to_string()
            } else {
                quote_string(&f.to_string())
            }
        }
        Value::Text(s) | Value::Json(s) => quote_string(s),
        Value::Decimal(s) => s.clone(),
        Value::Bytes(b) => format!("X'{}'", hex::encode(b)),
        Value::DateTime(dt) => quote_string(&dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::Date(d) => quote_string(&d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => quote_string(&t.format("%H:%M:%S").to_string()),
    }
}

/// Whether the input reads as an expression rather than a plain identifier.
///
/// Recognised markers: a function call, a math operator token, a logical
/// keyword, a numeric or string literal, or a comma at the top level.
pub fn is_expression(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }

    if trimmed == "*" {
        return true;
    }

    if is_function_call(trimmed) {
        return true;
    }

    if trimmed.parse::<f64>().is_ok() {
        return true;
    }

    if trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2 {
        return true;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        if in_string {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                } else {
                    in_string = false;
                }
            }
            continue;
        }
        match c {
            '\'' => in_string = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return true,
            '+' | '-' | '*' | '/' | '%' | '<' | '>' | '=' => return true,
            _ => {}
        }
    }

    let upper = trimmed.to_ascii_uppercase();
    ["AND", "OR", "NOT", "IS", "IN", "LIKE", "BETWEEN", "CASE", "NULL"]
        .iter()
        .any(|kw| {
            upper
                .split_whitespace()
                .any(|word| word.trim_matches(|c: char| !c.is_ascii_alphabetic()) == *kw)
        })
}

fn quote_segment(segment: &str) -> String {
    if segment == "*" {
        return "*".to_string();
    }
    format!("`{}`", segment.replace('`', "``"))
}

fn is_quoted(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
    matches!(
        (first, last),
        (b'`', b'`') | (b'"', b'"') | (b'[', b']')
    )
}

fn is_function_call(raw: &str) -> bool {
    if !raw.ends_with(')') {
        return false;
    }
    let Some(open) = raw.find('(') else {
        return false;
    };
    if open == 0 {
        return false;
    }
    raw[..open]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_plain_identifiers() {
        assert_eq!(format_identifier("users"), "`users`");
        assert_eq!(format_identifier("login_count"), "`login_count`");
    }

    #[test]
    fn quotes_each_dotted_segment() {
        assert_eq!(format_identifier("app.users"), "`app`.`users`");
        assert_eq!(format_identifier("u.id"), "`u`.`id`");
    }

    #[test]
    fn already_quoted_passes_through() {
        assert_eq!(format_identifier("`users`"), "`users`");
        assert_eq!(format_identifier("\"users\""), "\"users\"");
        assert_eq!(format_identifier("[users]"), "[users]");
    }

    #[test]
    fn function_calls_pass_through() {
        assert_eq!(format_identifier("COUNT(*)"), "COUNT(*)");
        assert_eq!(format_identifier("MAX(created_at)"), "MAX(created_at)");
    }

    #[test]
    fn quoting_is_idempotent() {
        let once = format_identifier("users");
        assert_eq!(format_identifier(&once), once);
    }

    #[test]
    fn expressions_are_recognised() {
        assert!(is_expression("a + b"));
        assert!(is_expression("price * 2"));
        assert!(is_expression("COALESCE(a, b)"));
        assert!(is_expression("status IS NULL"));
        assert!(is_expression("1"));
        assert!(is_expression("'literal'"));
        assert!(is_expression("a, b"));
        assert!(!is_expression("users"));
        assert!(!is_expression("login_count"));
    }

    #[test]
    fn alias_is_always_quoted() {
        assert_eq!(format_alias("users", "u"), "`users` AS `u`");
        assert_eq!(format_alias("COUNT(*)", "total"), "COUNT(*) AS `total`");
    }

    #[test]
    fn string_quoting_doubles_internal_quotes() {
        assert_eq!(quote_string("O'Neil"), "'O''Neil'");
    }

    #[test]
    fn formats_scalar_values() {
        assert_eq!(format_value(&Value::Null), "NULL");
        assert_eq!(format_value(&Value::Bool(true)), "1");
        assert_eq!(format_value(&Value::Bool(false)), "0");
        assert_eq!(format_value(&Value::Int(42)), "42");
        assert_eq!(format_value(&Value::Float(1.5)), "1.5");
        assert_eq!(format_value(&Value::Text("a'b".into())), "'a''b'");
        assert_eq!(format_value(&Value::Float(f64::NAN)), "'NaN'");
    }
}
