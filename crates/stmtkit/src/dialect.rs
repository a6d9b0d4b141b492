//! Backend identifier quoting and bind token styles.
//!
//! A [`Dialect`] knows the two things that differ between the supported
//! backends: how identifiers are quoted and which token marks a bound
//! parameter.
//!
//! ```ignore
//! use stmtkit::Dialect;
//!
//! assert_eq!(Dialect::MySql.escape_identifier("companies.name"), "`companies`.`name`");
//! assert_eq!(Dialect::Postgres.escape_identifier("public.users"), r#""public"."users""#);
//! ```

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier quoting and placeholder style of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Backtick quoting, named `:name` and positional `?` placeholders.
    #[default]
    MySql,
    /// Double quote quoting, positional `$1, $2, ...` placeholders only.
    Postgres,
}

impl Dialect {
    /// Character used to quote identifiers.
    pub fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Postgres => '"',
        }
    }

    /// Whether the backend accepts `:name` placeholders natively.
    pub fn supports_named_placeholders(self) -> bool {
        matches!(self, Dialect::MySql)
    }

    /// Quote a (possibly dotted) identifier segment by segment.
    ///
    /// Segments that are already quoted and `*` segments are kept as they are.
    pub fn escape_identifier(self, identifier: &str) -> String {
        let mut out = String::with_capacity(identifier.len() + 4);
        self.write_identifier(identifier, &mut out);
        out
    }

    pub(crate) fn write_identifier(self, identifier: &str, out: &mut String) {
        let quote = self.quote_char();
        let mut chars = identifier.chars().peekable();
        let mut first = true;

        loop {
            if !first {
                out.push('.');
            }
            first = false;

            if chars.peek() == Some(&quote) {
                // Already quoted segment: copy through the closing quote.
                out.push(quote);
                chars.next();
                while let Some(c) = chars.next() {
                    out.push(c);
                    if c == quote {
                        if chars.peek() == Some(&quote) {
                            out.push(quote);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                // Text trailing the closing quote stays verbatim.
                while let Some(&c) = chars.peek() {
                    if c == '.' {
                        break;
                    }
                    out.push(c);
                    chars.next();
                }
            } else {
                let mut segment = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '.' {
                        break;
                    }
                    segment.push(c);
                    chars.next();
                }
                if segment == "*" {
                    out.push('*');
                } else {
                    out.push(quote);
                    for c in segment.chars() {
                        if c == quote {
                            out.push(quote);
                        }
                        out.push(c);
                    }
                    out.push(quote);
                }
            }

            match chars.next() {
                Some('.') => continue,
                _ => break,
            }
        }
    }

    /// Whether `byte` opens a string literal. MySQL also accepts `"..."`.
    pub(crate) fn opens_literal(self, byte: u8) -> bool {
        byte == b'\'' || (byte == b'"' && self == Dialect::MySql)
    }

    /// Index just past the string literal opened at `start`.
    ///
    /// A doubled delimiter is an escaped delimiter; MySQL also escapes with a
    /// backslash. An unterminated literal runs to the end.
    pub(crate) fn skip_literal(self, bytes: &[u8], start: usize) -> usize {
        let delimiter = bytes[start];
        let mut i = start + 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if self == Dialect::MySql => i += 2,
                b if b == delimiter && bytes.get(i + 1) == Some(&delimiter) => i += 2,
                b if b == delimiter => return i + 1,
                _ => i += 1,
            }
        }
        bytes.len()
    }

    /// Native token for the positional parameter at `index` (0-based).
    pub fn positional_placeholder(self, index: usize) -> String {
        match self {
            Dialect::MySql => "?".to_string(),
            Dialect::Postgres => format!("${}", index + 1),
        }
    }

    /// Native token for a named parameter.
    pub fn named_placeholder(self, name: &str) -> String {
        format!(":{name}")
    }

    /// Quote a string literal.
    pub fn quote_string(self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('\'');
        for c in value.chars() {
            match c {
                '\'' => out.push_str("''"),
                '\\' if self == Dialect::MySql => out.push_str("\\\\"),
                _ => out.push(c),
            }
        }
        out.push('\'');
        out
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MySql => f.write_str("mysql"),
            Dialect::Postgres => f.write_str("postgres"),
        }
    }
}

impl FromStr for Dialect {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            other => Err(DbError::configuration(format!("unknown dialect '{other}'"))),
        }
    }
}
