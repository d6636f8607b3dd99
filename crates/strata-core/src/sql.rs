//! SQL statement splitting.
//!
//! Migration bodies are split on `;` so each statement can be sent on its
//! own. Semicolons inside quoted strings (including `E'...'` escape
//! strings), quoted identifiers, dollar-quoted bodies (PL/pgSQL functions)
//! and comments do not terminate a statement.

#[derive(Debug, PartialEq)]
enum State {
    Normal,
    SingleQuote,
    EscapeString,
    DoubleQuote,
    LineComment,
    BlockComment(usize),
    DollarQuote(String),
}

/// Split SQL into individual statements.
///
/// Trailing semicolons are stripped and fragments that contain nothing but
/// whitespace and comments are dropped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut state = State::Normal;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match &mut state {
            State::Normal => match c {
                ';' => {
                    flush(&mut statements, &mut current, has_code);
                    has_code = false;
                    i += 1;
                    continue;
                }
                '-' if next == Some('-') => {
                    state = State::LineComment;
                    current.push_str("--");
                    i += 2;
                    continue;
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment(1);
                    current.push_str("/*");
                    i += 2;
                    continue;
                }
                '\'' => {
                    state = if escape_prefix(&chars[..i]) {
                        State::EscapeString
                    } else {
                        State::SingleQuote
                    };
                    has_code = true;
                }
                '"' => {
                    state = State::DoubleQuote;
                    has_code = true;
                }
                '$' => {
                    has_code = true;
                    if let Some(tag) = dollar_tag(&chars[i..]) {
                        current.push_str(&tag);
                        i += tag.chars().count();
                        state = State::DollarQuote(tag);
                        continue;
                    }
                }
                c if !c.is_whitespace() => has_code = true,
                _ => {}
            },
            State::SingleQuote | State::DoubleQuote => {
                let quote = if state == State::SingleQuote { '\'' } else { '"' };
                if c == quote {
                    if next == Some(quote) {
                        // Doubled quote is an escape, stay inside the literal.
                        current.push(c);
                        current.push(quote);
                        i += 2;
                        continue;
                    }
                    state = State::Normal;
                }
            }
            State::EscapeString => match c {
                '\\' => {
                    current.push(c);
                    if let Some(escaped) = next {
                        current.push(escaped);
                    }
                    i += 2;
                    continue;
                }
                '\'' if next == Some('\'') => {
                    current.push_str("''");
                    i += 2;
                    continue;
                }
                '\'' => state = State::Normal,
                _ => {}
            },
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if c == '/' && next == Some('*') {
                    *depth += 1;
                    current.push_str("/*");
                    i += 2;
                    continue;
                }
                if c == '*' && next == Some('/') {
                    *depth -= 1;
                    if *depth == 0 {
                        state = State::Normal;
                    }
                    current.push_str("*/");
                    i += 2;
                    continue;
                }
            }
            State::DollarQuote(tag) => {
                if c == '$' && starts_with(&chars[i..], tag) {
                    let len = tag.chars().count();
                    current.push_str(tag);
                    i += len;
                    state = State::Normal;
                    continue;
                }
            }
        }

        current.push(c);
        i += 1;
    }

    flush(&mut statements, &mut current, has_code);
    statements
}

fn flush(statements: &mut Vec<String>, current: &mut String, has_code: bool) {
    let stmt = current.trim();
    if has_code && !stmt.is_empty() {
        statements.push(stmt.to_string());
    }
    current.clear();
}

/// Whether the text before a `'` ends in a standalone `E`/`e` prefix.
fn escape_prefix(before: &[char]) -> bool {
    match before {
        [.., prev, 'E' | 'e'] => !(prev.is_alphanumeric() || *prev == '_'),
        ['E' | 'e'] => true,
        _ => false,
    }
}

/// Match a dollar-quote opener like `$$` or `$body$` at the start of `chars`.
/// Positional parameters such as `$1` are not tags.
fn dollar_tag(chars: &[char]) -> Option<String> {
    let mut tag = String::from("$");
    for (idx, &c) in chars.iter().enumerate().skip(1) {
        if c == '$' {
            tag.push('$');
            return Some(tag);
        }
        let valid = if idx == 1 {
            c.is_alphabetic() || c == '_'
        } else {
            c.is_alphanumeric() || c == '_'
        };
        if !valid {
            return None;
        }
        tag.push(c);
    }
    None
}

fn starts_with(chars: &[char], tag: &str) -> bool {
    let mut rest = chars.iter();
    tag.chars().all(|t| rest.next() == Some(&t))
}
