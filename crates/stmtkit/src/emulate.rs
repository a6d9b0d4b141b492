//! Emulated statements for diagnostics.
//!
//! The emulated statement is the executed SQL with every bind token replaced by
//! the literal it was bound to. It exists for logs and error messages only and
//! is never sent to the backend.

use crate::backend::{BindSlot, BoundParam};
use crate::dialect::Dialect;
use crate::value::WireValue;
use std::collections::HashMap;

/// Inline bound values into `sql`.
///
/// `?` tokens take positional values in order, `$n` tokens take position `n`,
/// and `:name` tokens take the value bound to exactly that name. String values of
/// `max_preserved` or more characters are truncated. Tokens without a bound
/// value, and anything inside string literals or quoted identifiers, are kept.
pub fn emulate(
    sql: &str,
    params: &[BoundParam],
    dialect: Dialect,
    max_preserved: Option<usize>,
) -> String {
    if params.is_empty() {
        return sql.to_string();
    }

    let by_slot: HashMap<&BindSlot, &WireValue> =
        params.iter().map(|p| (&p.slot, &p.value)).collect();
    let literal = |slot: &BindSlot| {
        by_slot
            .get(slot)
            .map(|v| v.to_literal(dialect, max_preserved))
    };

    let bytes = sql.as_bytes();
    let quote = dialect.quote_char() as u8;
    let mut out = String::with_capacity(sql.len() + 32);
    let mut copied = 0;
    let mut next_question = 1;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b if dialect.opens_literal(b) => {
                i = dialect.skip_literal(bytes, i);
            }
            b if b == quote => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'?' => {
                if let Some(lit) = literal(&BindSlot::Position(next_question)) {
                    out.push_str(&sql[copied..i]);
                    out.push_str(&lit);
                    copied = i + 1;
                }
                next_question += 1;
                i += 1;
            }
            b'$' => {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let slot = sql[i + 1..end].parse().ok().map(BindSlot::Position);
                if let Some(lit) = slot.as_ref().and_then(|s| literal(s)) {
                    out.push_str(&sql[copied..i]);
                    out.push_str(&lit);
                    copied = end;
                }
                i = end.max(i + 1);
            }
            b':' => {
                let after_colon = i > 0 && bytes[i - 1] == b':';
                let mut end = i + 1;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                if !after_colon && end > i + 1 {
                    let slot = BindSlot::Named(sql[i..end].to_string());
                    if let Some(lit) = literal(&slot) {
                        out.push_str(&sql[copied..i]);
                        out.push_str(&lit);
                        copied = end;
                    }
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied.min(sql.len())..]);
    out
}
