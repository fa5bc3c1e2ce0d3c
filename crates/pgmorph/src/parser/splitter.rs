//! Statement and item splitting for SQL text.
//!
//! The splitter respects single- and double-quoted regions, line (`--`) and
//! block (`/* ... */`) comments, and parenthesis depth. It is shared by the
//! DDL parser and by the executor's per-statement validation pass, so both
//! see the same statement boundaries.

/// One raw statement with the byte offset of its first character in the
/// original input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatement {
    pub text: String,
    pub offset: usize,
}

/// Split SQL text into statements on `;` terminators.
///
/// Semicolons inside quotes, comments, or parentheses do not terminate a
/// statement. Comments are replaced by a single space so they never glue
/// two tokens together. Empty statements are dropped.
pub fn split_statements(input: &str) -> Vec<RawStatement> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut start: Option<usize> = None;
    let mut depth: i32 = 0;

    let bytes: Vec<(usize, char)> = input.char_indices().collect();
    let mut i = 0;
    while i < bytes.len() {
        let (pos, ch) = bytes[i];

        // Line comment
        if ch == '-' && matches!(bytes.get(i + 1), Some((_, '-'))) {
            while i < bytes.len() && bytes[i].1 != '\n' {
                i += 1;
            }
            current.push(' ');
            continue;
        }

        // Block comment
        if ch == '/' && matches!(bytes.get(i + 1), Some((_, '*'))) {
            i += 2;
            while i < bytes.len() {
                if bytes[i].1 == '*' && matches!(bytes.get(i + 1), Some((_, '/'))) {
                    i += 2;
                    break;
                }
                i += 1;
            }
            current.push(' ');
            continue;
        }

        // Quoted regions pass through verbatim.
        if ch == '\'' || ch == '"' {
            let quote = ch;
            if start.is_none() {
                start = Some(pos);
            }
            current.push(ch);
            i += 1;
            while i < bytes.len() {
                let c = bytes[i].1;
                current.push(c);
                i += 1;
                if c == quote {
                    // Doubled quote is an escape, not a terminator.
                    if matches!(bytes.get(i), Some((_, next)) if *next == quote) {
                        current.push(quote);
                        i += 1;
                        continue;
                    }
                    break;
                }
            }
            continue;
        }

        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ';' if depth <= 0 => {
                let text = current.trim().to_string();
                if !text.is_empty() {
                    statements.push(RawStatement {
                        text,
                        offset: start.unwrap_or(pos),
                    });
                }
                current.clear();
                start = None;
                i += 1;
                continue;
            }
            _ => {}
        }

        if start.is_none() && !ch.is_whitespace() {
            start = Some(pos);
        }
        current.push(ch);
        i += 1;
    }

    let text = current.trim().to_string();
    if !text.is_empty() {
        statements.push(RawStatement {
            text,
            offset: start.unwrap_or(0),
        });
    }

    statements
}

/// Split a parenthesized body on commas at parenthesis depth zero.
pub fn split_top_level_commas(body: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut chars = body.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                let quote = ch;
                current.push(ch);
                for c in chars.by_ref() {
                    current.push(c);
                    if c == quote {
                        break;
                    }
                }
            }
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                let item = current.trim().to_string();
                if !item.is_empty() {
                    items.push(item);
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let item = current.trim().to_string();
    if !item.is_empty() {
        items.push(item);
    }
    items
}
