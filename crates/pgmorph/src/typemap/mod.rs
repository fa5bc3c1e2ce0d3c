//! Type and default-expression normalization.
//!
//! The parser and the introspector must agree on a single canonical form for
//! every type and default they see, otherwise the differ reports phantom
//! changes. The rules: uppercase the base type, preserve the parameter list
//! verbatim, fold well-known aliases onto one spelling, and reduce identity
//! and serial defaults to the marker `nextval()`.

/// Normalize a raw SQL type to its canonical uppercase form.
///
/// `int` → `INTEGER`, `bool` → `BOOLEAN`, `varchar(255)` → `VARCHAR(255)`,
/// `character varying(40)` → `VARCHAR(40)`, `timestamptz` →
/// `TIMESTAMP WITH TIME ZONE`. Serial types fold onto their backing integer
/// type; callers are expected to record the identity default separately
/// (see [`is_serial`]).
pub fn normalize_type(raw: &str) -> String {
    let raw = raw.trim();
    let (base, params) = split_params(raw);
    let base = base.split_whitespace().collect::<Vec<_>>().join(" ");
    let upper = base.to_uppercase();

    let canonical = match upper.as_str() {
        "INT" | "INT4" => "INTEGER",
        "INT2" => "SMALLINT",
        "INT8" => "BIGINT",
        "BOOL" => "BOOLEAN",
        "FLOAT4" => "REAL",
        "FLOAT8" | "FLOAT" => "DOUBLE PRECISION",
        "CHARACTER VARYING" => "VARCHAR",
        "CHARACTER" | "BPCHAR" => "CHAR",
        "DECIMAL" => "NUMERIC",
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => "TIMESTAMP WITH TIME ZONE",
        "TIMESTAMP WITHOUT TIME ZONE" => "TIMESTAMP",
        "TIMETZ" | "TIME WITH TIME ZONE" => "TIME WITH TIME ZONE",
        "TIME WITHOUT TIME ZONE" => "TIME",
        "SERIAL" | "SERIAL4" => "INTEGER",
        "SERIAL2" | "SMALLSERIAL" => "SMALLINT",
        "SERIAL8" | "BIGSERIAL" => "BIGINT",
        other => other,
    };

    match params {
        // Parameter lists keep their values but lose optional whitespace.
        Some(p) => {
            let params: Vec<&str> = p.split(',').map(str::trim).collect();
            format!("{}({})", canonical, params.join(","))
        }
        None => canonical.to_string(),
    }
}

/// Whether a raw type token names a serial pseudo-type.
pub fn is_serial(raw: &str) -> bool {
    matches!(
        raw.trim().to_uppercase().as_str(),
        "SERIAL" | "SERIAL2" | "SERIAL4" | "SERIAL8" | "SMALLSERIAL" | "BIGSERIAL"
    )
}

/// The canonical default marker for identity and serial columns.
pub const IDENTITY_DEFAULT: &str = "nextval()";

/// Normalize a default expression for comparison.
///
/// Trims, collapses whitespace, strips redundant `::type` casts outside
/// quotes (`'x'::text` → `'x'`), lowercases well-known niladic function
/// defaults (`NOW()` → `now()`), and reduces any sequence-backed default to
/// the identity marker.
pub fn normalize_default(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw.trim());
    if collapsed.is_empty() {
        return collapsed;
    }

    let lower = collapsed.to_lowercase();
    if lower.starts_with("nextval(") {
        return IDENTITY_DEFAULT.to_string();
    }

    let stripped = strip_casts(&collapsed);

    // Keyword functions compare case-insensitively; fold them to lowercase.
    const KEYWORD_FUNCTIONS: &[&str] = &[
        "now()",
        "current_timestamp",
        "current_date",
        "current_time",
        "localtimestamp",
        "gen_random_uuid()",
    ];
    let stripped_lower = stripped.to_lowercase();
    for kw in KEYWORD_FUNCTIONS {
        if stripped_lower == *kw {
            return (*kw).to_string();
        }
    }

    // Bare booleans and NULL also fold to lowercase.
    match stripped_lower.as_str() {
        "true" | "false" | "null" => stripped_lower,
        _ => stripped,
    }
}

/// Whether changing a column from `old` to `new` is in the safe-widening
/// set: integer promotions, growing a `VARCHAR`, `VARCHAR` → `TEXT`, or
/// widening a `NUMERIC`.
pub fn is_safe_widening(old: &str, new: &str) -> bool {
    if old == new {
        return true;
    }

    let int_rank = |t: &str| match t {
        "SMALLINT" => Some(1),
        "INTEGER" => Some(2),
        "BIGINT" => Some(3),
        _ => None,
    };
    if let (Some(a), Some(b)) = (int_rank(old), int_rank(new)) {
        return b > a;
    }

    let (old_base, old_params) = split_params(old);
    let (new_base, new_params) = split_params(new);

    if old_base == "VARCHAR" {
        if new_base == "TEXT" {
            return true;
        }
        if new_base == "VARCHAR" {
            return match (parse_len(old_params), parse_len(new_params)) {
                (Some(m), Some(n)) => n > m,
                // VARCHAR without a length is unbounded.
                (Some(_), None) => true,
                _ => false,
            };
        }
    }

    if old_base == "NUMERIC" && new_base == "NUMERIC" {
        let old_ps = parse_numeric_params(old_params);
        let new_ps = parse_numeric_params(new_params);
        return match (old_ps, new_ps) {
            // Unparameterized NUMERIC is the widest form.
            (Some(_), None) => true,
            (Some((op, os)), Some((np, ns))) => np >= op && ns >= os && (np, ns) != (op, os),
            _ => false,
        };
    }

    false
}

/// Normalize a check-constraint expression for comparison.
///
/// The catalog re-prints expressions with extra parentheses and casts
/// (`CHECK ((age >= 0))`), so both producers funnel through this: collapse
/// whitespace, strip casts, and peel matched outer parentheses.
pub fn normalize_check_expr(raw: &str) -> String {
    let mut s = strip_casts(&collapse_whitespace(raw.trim()));
    loop {
        let trimmed = s.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('(') && trimmed.ends_with(')') {
            // Only peel when the outer parens match each other.
            let inner = &trimmed[1..trimmed.len() - 1];
            let mut depth = 0i32;
            let mut matched = true;
            for ch in inner.chars() {
                match ch {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth < 0 {
                            matched = false;
                            break;
                        }
                    }
                    _ => {}
                }
            }
            if matched && depth == 0 {
                s = inner.trim().to_string();
                continue;
            }
        }
        break;
    }
    s
}

/// Split `VARCHAR(255)` into `("VARCHAR", Some("255"))`.
fn split_params(raw: &str) -> (&str, Option<&str>) {
    match raw.find('(') {
        Some(open) => {
            let close = raw.rfind(')').unwrap_or(raw.len());
            (raw[..open].trim_end(), Some(raw[open + 1..close].trim()))
        }
        None => (raw, None),
    }
}

fn parse_len(params: Option<&str>) -> Option<u32> {
    params.and_then(|p| p.trim().parse().ok())
}

fn parse_numeric_params(params: Option<&str>) -> Option<(u32, u32)> {
    let params = params?;
    let mut parts = params.split(',').map(str::trim);
    let precision: u32 = parts.next()?.parse().ok()?;
    let scale: u32 = parts.next().map_or(Some(0), |s| s.parse().ok())?;
    Some((precision, scale))
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_quote = false;
    let mut last_space = false;
    for ch in s.chars() {
        if ch == '\'' {
            in_quote = !in_quote;
        }
        if !in_quote && ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

/// Strip `::type` cast suffixes that appear outside single quotes.
/// `'active'::character varying` → `'active'`, `(0)::numeric` → `(0)`.
fn strip_casts(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    let mut in_quote = false;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '\'' {
            in_quote = !in_quote;
            out.push(ch);
            i += 1;
            continue;
        }
        if !in_quote && ch == ':' && i + 1 < chars.len() && chars[i + 1] == ':' {
            // Consume the cast target: identifier words, optionally
            // parenthesized parameters.
            i += 2;
            while i < chars.len() {
                let c = chars[i];
                if c.is_alphanumeric() || c == '_' || c == ' ' {
                    i += 1;
                } else if c == '(' {
                    while i < chars.len() && chars[i] != ')' {
                        i += 1;
                    }
                    i += 1;
                } else {
                    break;
                }
            }
            continue;
        }
        out.push(ch);
        i += 1;
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_type_aliases() {
        assert_eq!(normalize_type("int"), "INTEGER");
        assert_eq!(normalize_type("int4"), "INTEGER");
        assert_eq!(normalize_type("int8"), "BIGINT");
        assert_eq!(normalize_type("bool"), "BOOLEAN");
        assert_eq!(normalize_type("float8"), "DOUBLE PRECISION");
        assert_eq!(normalize_type("text"), "TEXT");
    }

    #[test]
    fn test_normalize_type_preserves_params() {
        assert_eq!(normalize_type("varchar(255)"), "VARCHAR(255)");
        assert_eq!(normalize_type("character varying(40)"), "VARCHAR(40)");
        assert_eq!(normalize_type("NUMERIC(10, 2)"), "NUMERIC(10,2)");
        assert_eq!(normalize_type("decimal(6,3)"), "NUMERIC(6,3)");
    }

    #[test]
    fn test_normalize_type_timestamps() {
        assert_eq!(normalize_type("timestamptz"), "TIMESTAMP WITH TIME ZONE");
        assert_eq!(normalize_type("timestamp without time zone"), "TIMESTAMP");
        assert_eq!(normalize_type("timestamp"), "TIMESTAMP");
    }

    #[test]
    fn test_normalize_type_serial() {
        assert_eq!(normalize_type("serial"), "INTEGER");
        assert_eq!(normalize_type("bigserial"), "BIGINT");
        assert!(is_serial("SERIAL"));
        assert!(is_serial("bigserial"));
        assert!(!is_serial("integer"));
    }

    #[test]
    fn test_normalize_default_strips_casts() {
        assert_eq!(normalize_default("'x'::text"), "'x'");
        assert_eq!(normalize_default("'active'::character varying"), "'active'");
        assert_eq!(normalize_default("0"), "0");
    }

    #[test]
    fn test_normalize_default_keyword_functions() {
        assert_eq!(normalize_default("NOW()"), "now()");
        assert_eq!(normalize_default("now()"), "now()");
        assert_eq!(normalize_default("CURRENT_TIMESTAMP"), "current_timestamp");
    }

    #[test]
    fn test_normalize_default_identity() {
        assert_eq!(
            normalize_default("nextval('users_id_seq'::regclass)"),
            IDENTITY_DEFAULT
        );
        assert_eq!(normalize_default("NEXTVAL('s')"), IDENTITY_DEFAULT);
    }

    #[test]
    fn test_normalize_default_collapses_whitespace() {
        assert_eq!(normalize_default("  1  +   2 "), "1 + 2");
    }

    #[test]
    fn test_normalize_default_preserves_quoted_content() {
        assert_eq!(normalize_default("'a  b'"), "'a  b'");
    }

    #[test]
    fn test_safe_widening_integers() {
        assert!(is_safe_widening("SMALLINT", "INTEGER"));
        assert!(is_safe_widening("INTEGER", "BIGINT"));
        assert!(is_safe_widening("SMALLINT", "BIGINT"));
        assert!(!is_safe_widening("BIGINT", "INTEGER"));
    }

    #[test]
    fn test_safe_widening_varchar() {
        assert!(is_safe_widening("VARCHAR(50)", "VARCHAR(200)"));
        assert!(is_safe_widening("VARCHAR(50)", "TEXT"));
        assert!(is_safe_widening("VARCHAR(50)", "VARCHAR"));
        assert!(!is_safe_widening("VARCHAR(200)", "VARCHAR(50)"));
        assert!(!is_safe_widening("TEXT", "VARCHAR(50)"));
    }

    #[test]
    fn test_safe_widening_numeric() {
        assert!(is_safe_widening("NUMERIC(10,2)", "NUMERIC(12,4)"));
        assert!(is_safe_widening("NUMERIC(10,2)", "NUMERIC"));
        assert!(!is_safe_widening("NUMERIC(12,4)", "NUMERIC(10,2)"));
        assert!(!is_safe_widening("NUMERIC(10,4)", "NUMERIC(12,2)"));
    }

    #[test]
    fn test_normalize_check_expr_peels_catalog_wrapping() {
        assert_eq!(normalize_check_expr("((age >= 0))"), "age >= 0");
        assert_eq!(
            normalize_check_expr("(status = ANY (ARRAY['a'::text, 'b'::text]))"),
            "status = ANY (ARRAY['a', 'b'])"
        );
        // Outer parens that do not match each other stay.
        assert_eq!(normalize_check_expr("(a > 0) AND (b > 0)"), "(a > 0) AND (b > 0)");
    }

    #[test]
    fn test_unrelated_types_not_widening() {
        assert!(!is_safe_widening("INTEGER", "TEXT"));
        assert!(!is_safe_widening("TIMESTAMP", "DATE"));
    }
}
