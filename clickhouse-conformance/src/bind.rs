//! `$N` positional parameter binding.
//!
//! Placeholders are substituted client-side by typed SQL literals; the server performs any
//! coercion requested by casts in the SQL text (`$1::Int8`).
use crate::value::Value;
use crate::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lexer {
    Code,
    Quoted(u8),
    LineComment,
    BlockComment,
}

/// Replace every `$N` outside string literals, quoted identifiers and comments with the literal
/// form of `args[N - 1]`. Repeated placeholders bind the same value.
///
/// # Errors
/// Returns [`Error::InvalidArgument`] if a placeholder has no matching argument.
pub fn bind(sql: &str, args: &[Value]) -> Result<String> {
    if args.is_empty() {
        return Ok(sql.to_string());
    }

    let bytes = sql.as_bytes();
    let peek = |i: usize| bytes.get(i).copied();
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let mut state = Lexer::Code;
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            Lexer::Code => match b {
                b'\'' | b'"' | b'`' => state = Lexer::Quoted(b),
                b'-' if peek(i + 1) == Some(b'-') => {
                    state = Lexer::LineComment;
                    i += 1;
                }
                b'/' if peek(i + 1) == Some(b'*') => {
                    state = Lexer::BlockComment;
                    i += 1;
                }
                b'$' => {
                    let start = i + 1;
                    let end = start
                        + bytes[start..].iter().take_while(|c| c.is_ascii_digit()).count();
                    if end > start {
                        let index = sql[start..end].parse::<usize>().ok().filter(|n| *n > 0);
                        let arg = index.and_then(|n| args.get(n - 1)).ok_or_else(|| {
                            Error::InvalidArgument(format!(
                                "placeholder ${} has no argument ({} provided)",
                                &sql[start..end],
                                args.len()
                            ))
                        })?;
                        out.push_str(&sql[last..i]);
                        out.push_str(&arg.to_sql_literal());
                        last = end;
                        i = end;
                        continue;
                    }
                }
                _ => {}
            },
            Lexer::Quoted(quote) => {
                if b == b'\\' {
                    i += 1;
                } else if b == quote {
                    state = Lexer::Code;
                }
            }
            Lexer::LineComment => {
                if b == b'\n' {
                    state = Lexer::Code;
                }
            }
            Lexer::BlockComment => {
                if b == b'*' && peek(i + 1) == Some(b'/') {
                    state = Lexer::Code;
                    i += 1;
                }
            }
        }
        i += 1;
    }

    out.push_str(&sql[last..]);
    Ok(out)
}

/// The first keyword of a statement, past leading whitespace and comments.
pub(crate) fn leading_keyword(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(line) = rest.strip_prefix("--") {
            rest = line.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(block) = rest.strip_prefix("/*") {
            rest = block.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            break;
        }
    }
    let end = rest.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(rest.len());
    &rest[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_bind_repeated_placeholders() {
        let sql = "SELECT $1::Int8, $2::Int64, $1::UInt8, $2::UInt64";
        let bound = bind(sql, &[Value::from(10_i32), Value::from(1000_i32)]).unwrap();
        assert_eq!(bound, "SELECT 10::Int8, 1000::Int64, 10::UInt8, 1000::UInt64");
    }

    #[test]
    fn test_bind_skips_quotes_and_comments() {
        let sql = "SELECT '$1', \"$1\", `$1` -- $1\n, $1 /* $2 */";
        let bound = bind(sql, &[Value::from("a'b")]).unwrap();
        assert_eq!(bound, "SELECT '$1', \"$1\", `$1` -- $1\n, 'a\\'b' /* $2 */");

        let escaped = bind(r"SELECT 'it\'s $1', $1", &[Value::from(1_u8)]).unwrap();
        assert_eq!(escaped, r"SELECT 'it\'s $1', 1");
    }

    #[test]
    fn test_bind_missing_argument() {
        let err = bind("SELECT $1, $3", &[Value::from(1_u8), Value::from(2_u8)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = bind("SELECT $0", &[Value::from(1_u8)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_leading_keyword_skips_comments() {
        assert_eq!(leading_keyword("  INSERT INTO t VALUES"), "INSERT");
        assert_eq!(leading_keyword("-- load\n/* batch 1 */\n\tinsert into t"), "insert");
        assert_eq!(leading_keyword("/* INSERT */ SELECT 1"), "SELECT");
        assert_eq!(leading_keyword("SELECT(1)"), "SELECT");
        assert_eq!(leading_keyword("-- only a comment"), "");
        assert_eq!(leading_keyword("/* unterminated"), "");
    }

    #[test]
    fn test_bind_passthrough() {
        assert_eq!(bind("SELECT $1", &[]).unwrap(), "SELECT $1");
        assert_eq!(bind("SELECT $x, 1", &[Value::Null]).unwrap(), "SELECT $x, 1");
        assert_eq!(bind("SELECT $1 -- é", &[Value::Null]).unwrap(), "SELECT NULL -- é");
    }
}
