// Statement Binding
// Turns a command plus named parameters into driver-ready SQL with positional placeholders

use crate::db::params::Params;
use crate::db::traits::CellValue;

/// Positional placeholder syntax of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `@P1, @P2, ...` (tiberius / TDS RPC)
    AtP,
    /// `$1, $2, ...` (PostgreSQL extended protocol)
    Dollar,
}

impl PlaceholderStyle {
    fn placeholder(&self, position: usize) -> String {
        match self {
            PlaceholderStyle::AtP => format!("@P{}", position),
            PlaceholderStyle::Dollar => format!("${}", position),
        }
    }
}

/// SQL ready to send plus the values for its positional placeholders, in order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement<'p> {
    pub sql: String,
    pub values: Vec<&'p CellValue>,
}

impl<'p> BoundStatement<'p> {
    /// Position of parameter `idx`, binding its value on first use
    fn position_of(&mut self, order: &mut Vec<usize>, idx: usize, value: &'p CellValue) -> usize {
        if let Some(pos) = order.iter().position(|&seen| seen == idx) {
            return pos + 1;
        }
        order.push(idx);
        self.values.push(value);
        order.len()
    }
}

/// Rewrite `@name` placeholders in SQL text to positional ones.
///
/// Names are matched against `params` ignoring case. Unknown names, `@@globals`,
/// string literals, quoted identifiers and comments are left as written, and only
/// parameters that are actually referenced are bound.
pub fn bind_text<'p>(sql: &str, params: &'p Params, style: PlaceholderStyle) -> BoundStatement<'p> {
    let mut bound = BoundStatement {
        sql: String::with_capacity(sql.len()),
        values: Vec::new(),
    };
    if params.is_empty() {
        bound.sql.push_str(sql);
        return bound;
    }

    let mut order = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = skip_quoted(&chars, i, c);
                bound.sql.extend(&chars[i..end]);
                i = end;
            }
            // T-SQL bracketed identifier; in PostgreSQL `[` is an array subscript
            '[' if style == PlaceholderStyle::AtP => {
                let end = skip_quoted(&chars, i, ']');
                bound.sql.extend(&chars[i..end]);
                i = end;
            }
            '$' if style == PlaceholderStyle::Dollar => {
                let end = match dollar_tag_len(&chars, i) {
                    Some(tag_len) => skip_dollar_quoted(&chars, i, tag_len),
                    None => i + 1,
                };
                bound.sql.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map(|offset| i + offset)
                    .unwrap_or(chars.len());
                bound.sql.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = find_block_comment_end(&chars, i + 2);
                bound.sql.extend(&chars[i..end]);
                i = end;
            }
            '@' if chars.get(i + 1) == Some(&'@') => {
                // @@ROWCOUNT and friends
                let end = ident_end(&chars, i + 2);
                bound.sql.extend(&chars[i..end]);
                i = end;
            }
            '@' if chars.get(i + 1).is_some_and(|ch| is_ident_start(*ch)) => {
                let end = ident_end(&chars, i + 1);
                let name: String = chars[i + 1..end].iter().collect();
                match params.find(&name) {
                    Some((idx, value)) => {
                        let pos = bound.position_of(&mut order, idx, value);
                        bound.sql.push_str(&style.placeholder(pos));
                    }
                    None => bound.sql.extend(&chars[i..end]),
                }
                i = end;
            }
            _ => {
                bound.sql.push(c);
                i += 1;
            }
        }
    }

    bound
}

/// `EXEC proc @a = @P1, @b = @P2`
pub fn mssql_procedure_call<'p>(procedure: &str, params: &'p Params) -> BoundStatement<'p> {
    let args: Vec<String> = params
        .iter()
        .enumerate()
        .map(|(idx, (name, _))| format!("@{} = @P{}", name, idx + 1))
        .collect();

    let sql = if args.is_empty() {
        format!("EXEC {}", procedure)
    } else {
        format!("EXEC {} {}", procedure, args.join(", "))
    };

    BoundStatement {
        sql,
        values: params.iter().map(|(_, value)| value).collect(),
    }
}

/// `SELECT * FROM func(a => $1, b => $2)` for row-returning calls,
/// `CALL proc(a => $1, b => $2)` otherwise
pub fn postgres_routine_call<'p>(
    routine: &str,
    params: &'p Params,
    returns_rows: bool,
) -> BoundStatement<'p> {
    let args: Vec<String> = params
        .iter()
        .enumerate()
        .map(|(idx, (name, _))| format!("{} => ${}", name, idx + 1))
        .collect();

    let sql = if returns_rows {
        format!("SELECT * FROM {}({})", routine, args.join(", "))
    } else {
        format!("CALL {}({})", routine, args.join(", "))
    };

    BoundStatement {
        sql,
        values: params.iter().map(|(_, value)| value).collect(),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn ident_end(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .position(|ch| !(ch.is_alphanumeric() || *ch == '_' || *ch == '$' || *ch == '#'))
        .map(|offset| start + offset)
        .unwrap_or(chars.len())
}

/// Length of the `$tag$` opener at `start`, if one starts there
fn dollar_tag_len(chars: &[char], start: usize) -> Option<usize> {
    // `a$b` is an identifier, `$1` a positional parameter
    if start > 0 && (chars[start - 1].is_alphanumeric() || chars[start - 1] == '_') {
        return None;
    }

    let mut i = start + 1;
    match chars.get(i) {
        Some(&'$') => return Some(2),
        Some(ch) if is_ident_start(*ch) => {}
        _ => return None,
    }
    while let Some(&ch) = chars.get(i) {
        if ch == '$' {
            return Some(i + 1 - start);
        }
        if !(ch.is_alphanumeric() || ch == '_') {
            return None;
        }
        i += 1;
    }
    None
}

/// End (exclusive) of a dollar-quoted body whose opener is `tag_len` chars long
fn skip_dollar_quoted(chars: &[char], start: usize, tag_len: usize) -> usize {
    let tag = &chars[start..start + tag_len];
    let mut i = start + tag_len;
    while i + tag_len <= chars.len() {
        if &chars[i..i + tag_len] == tag {
            return i + tag_len;
        }
        i += 1;
    }
    chars.len()
}

/// End (exclusive) of a quoted run starting at `start`; doubled closers are escapes
fn skip_quoted(chars: &[char], start: usize, close: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == close {
            if chars.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn find_block_comment_end(chars: &[char], start: usize) -> usize {
    let mut i = start;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}
