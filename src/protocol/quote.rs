//! Quoting rules for array and composite literals.
//!
//! Elements inside `{...}` and fields inside `(...)` share one grammar: a value
//! is written bare unless it could be misread, in which case it is wrapped in
//! double quotes with `"` and `\` backslash-escaped.

/// Whitespace as understood by the server's literal parser (C `isspace`).
#[inline]
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | 0x0B | 0x0C | b'\r')
}

/// Check whether a literal element must be quoted.
///
/// True for the empty string, for values with leading or trailing whitespace,
/// and for values containing any of `" \ { } ( ) ,`.
pub fn needs_quotes(value: &str) -> bool {
    let bytes = value.as_bytes();
    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return true;
    };
    if is_space(first) || is_space(last) {
        return true;
    }
    bytes
        .iter()
        .any(|b| matches!(b, b'"' | b'\\' | b'{' | b'}' | b'(' | b')' | b','))
}

/// Append `value` to `out`, backslash-escaping `"` and `\`.
pub fn escape_quotes(value: &str, out: &mut String) {
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Append `value` to `out`, quoted and escaped only if [`needs_quotes`] says so.
#[inline]
pub fn quote_and_escape_if_needed(value: &str, out: &mut String) {
    if !needs_quotes(value) {
        out.push_str(value);
        return;
    }
    out.reserve(value.len() + 2);
    out.push('"');
    escape_quotes(value, out);
    out.push('"');
}
