//! Hook for rewriting a validated query before evaluation and execution.

use crate::sql::dialect::Dialect;

pub trait QueryOptimizer: Send + Sync {
    fn optimize(&self, sql: &str, dialect: Dialect) -> String;
}

/// Collapses runs of whitespace in SQL text; leaves semantics alone.
///
/// String literals, quoted identifiers and comments are copied verbatim. A
/// `--` comment keeps its terminating newline so the statement after it
/// stays code.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceOptimizer;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Code,
    Literal,
    QuotedIdent,
    LineComment,
    BlockComment,
}

impl QueryOptimizer for WhitespaceOptimizer {
    fn optimize(&self, sql: &str, _dialect: Dialect) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut state = Lexeme::Code;
        let mut pending_space = false;
        let mut chars = sql.chars().peekable();

        while let Some(c) = chars.next() {
            match state {
                Lexeme::Literal | Lexeme::QuotedIdent => {
                    out.push(c);
                    let closing = if state == Lexeme::Literal { '\'' } else { '"' };
                    if c == closing {
                        state = Lexeme::Code;
                    }
                }
                Lexeme::LineComment => {
                    out.push(c);
                    if c == '\n' {
                        state = Lexeme::Code;
                    }
                }
                Lexeme::BlockComment => {
                    out.push(c);
                    if c == '*' && chars.peek() == Some(&'/') {
                        out.push('/');
                        chars.next();
                        state = Lexeme::Code;
                    }
                }
                Lexeme::Code => {
                    if c.is_whitespace() {
                        pending_space = !out.is_empty() && !out.ends_with('\n');
                        continue;
                    }
                    if pending_space {
                        out.push(' ');
                        pending_space = false;
                    }
                    out.push(c);
                    match (c, chars.peek()) {
                        ('\'', _) => state = Lexeme::Literal,
                        ('"', _) => state = Lexeme::QuotedIdent,
                        ('-', Some('-')) => {
                            out.push('-');
                            chars.next();
                            state = Lexeme::LineComment;
                        }
                        ('/', Some('*')) => {
                            out.push('*');
                            chars.next();
                            state = Lexeme::BlockComment;
                        }
                        _ => {}
                    }
                }
            }
        }

        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        out
    }
}
