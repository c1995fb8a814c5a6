//! POSIX shell quoting.
//!
//! Every value interpolated into a remote command line goes through
//! [`quote`]. Values are wrapped in single quotes, inside which the shell
//! performs no expansion at all; embedded single quotes are closed,
//! escaped and reopened (`'` becomes `'\''`).

/// Quote a single word for `sh`.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Quote each word and join them with spaces.
pub fn join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// True if `value` contains bytes that must never reach a config file line
/// (newlines, NUL and other control characters).
pub fn has_control_chars(value: &str) -> bool {
    value.chars().any(|c| c.is_control())
}
