//! In-memory edits of the two remote config formats.
//!
//! `config.ini` is flat `key = value`. `clients.conf` is FreeRADIUS block
//! syntax, `client <name> { ... }`, possibly with nested blocks. Every
//! function here is pure and idempotent: applying it to its own output
//! returns that output unchanged.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("client block `{0}` not found")]
    BlockNotFound(String),

    #[error("client block `{0}` is never closed")]
    UnterminatedBlock(String),

    #[error("client block `{0}` is written on a single line and cannot be edited")]
    InlineBlock(String),
}

impl From<EditError> for crate::Error {
    fn from(e: EditError) -> Self {
        crate::Error::configuration(e.to_string())
    }
}

/// Set `key` in a flat `key = value` file.
///
/// The first assignment of `key` is rewritten in place, keeping its
/// indentation; later duplicates are left alone. A missing key is appended.
pub fn set_ini_value(text: &str, key: &str, value: &str) -> String {
    let mut out = String::with_capacity(text.len() + key.len() + value.len() + 4);
    let mut replaced = false;

    for line in text.split_inclusive('\n') {
        if !replaced && assigns_key(line, key) {
            let indent = indentation(line);
            out.push_str(&format!("{indent}{key} = {value}{}", line_ending(line)));
            replaced = true;
        } else {
            out.push_str(line);
        }
    }

    if !replaced {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("{key} = {value}\n"));
    }
    out
}

/// Current value of `key`, if assigned.
pub fn ini_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines()
        .find(|line| assigns_key(line, key))
        .and_then(|line| line.split_once('='))
        .map(|(_, value)| value.trim())
}

/// Set the `secret` of `client <block> { ... }`, leaving every other block alone.
///
/// Only a `secret` assignment directly inside the block is rewritten;
/// nested sections are skipped. A block without one gets a secret line
/// inserted before its closing brace.
pub fn set_client_secret(text: &str, block: &str, secret: &str) -> Result<String, EditError> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let ClientBlock {
        header,
        secret_at,
        close_at,
    } = find_client_block(&lines, block)?;
    let value = conf_value(secret);

    let mut out = String::with_capacity(text.len() + value.len() + 16);
    for (i, line) in lines.iter().enumerate() {
        match secret_at {
            Some(at) if at == i => {
                out.push_str(&format!(
                    "{}secret = {value}{}",
                    indentation(line),
                    line_ending(line)
                ));
                continue;
            }
            None if i == close_at => {
                let indent = lines[header + 1..close_at]
                    .iter()
                    .find(|l| !l.trim().is_empty())
                    .map(|l| indentation(l))
                    .unwrap_or("    ");
                out.push_str(&format!("{indent}secret = {value}\n"));
            }
            _ => {}
        }
        out.push_str(line);
    }
    Ok(out)
}

/// Current `secret` of `client <block> { ... }`, unquoted. `None` when the
/// block is missing, malformed or has no secret.
pub fn client_secret(text: &str, block: &str) -> Option<String> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let at = find_client_block(&lines, block).ok()?.secret_at?;
    let (_, raw) = code(lines[at]).split_once('=')?;
    Some(unquote(raw.trim()))
}

/// Line positions of one client block.
struct ClientBlock {
    header: usize,
    secret_at: Option<usize>,
    close_at: usize,
}

fn find_client_block(lines: &[&str], block: &str) -> Result<ClientBlock, EditError> {
    let header = lines
        .iter()
        .position(|line| is_client_header(line, block))
        .ok_or_else(|| EditError::BlockNotFound(block.to_string()))?;

    let (opens, closes) = braces(lines[header]);
    if opens > 0 && closes >= opens {
        return Err(EditError::InlineBlock(block.to_string()));
    }

    let mut depth = opens - closes;
    let mut opened = opens > 0;
    let mut secret_at = None;

    for (i, line) in lines.iter().enumerate().skip(header + 1) {
        let (opens, closes) = braces(line);
        if opened && depth == 1 && opens == 0 && closes == 0 && secret_at.is_none() && is_secret_line(line) {
            secret_at = Some(i);
        }
        depth += opens - closes;
        if opens > 0 {
            opened = true;
        }
        if opened && depth <= 0 {
            return Ok(ClientBlock {
                header,
                secret_at,
                close_at: i,
            });
        }
    }
    Err(EditError::UnterminatedBlock(block.to_string()))
}

/// Inverse of [`conf_value`].
fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped || c != '\\' {
            out.push(c);
            escaped = false;
        } else {
            escaped = true;
        }
    }
    out
}

/// Render a value for `clients.conf`: bare when it is a plain word,
/// otherwise double-quoted with `\` and `"` escaped.
pub fn conf_value(value: &str) -> String {
    let bare = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.:/@+".contains(c));
    if bare {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn assigns_key(line: &str, key: &str) -> bool {
    line.trim_start()
        .strip_prefix(key)
        .is_some_and(|rest| rest.trim_start().starts_with('='))
}

fn is_secret_line(line: &str) -> bool {
    assigns_key(code(line), "secret")
}

fn is_client_header(line: &str, block: &str) -> bool {
    let mut words = code(line).split_whitespace();
    words.next() == Some("client")
        && words
            .next()
            .is_some_and(|name| name.trim_end_matches('{') == block)
}

/// The part of a line before any `#` comment outside double quotes.
fn code(line: &str) -> &str {
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Opening and closing braces outside quotes and comments.
fn braces(line: &str) -> (i32, i32) {
    let mut quoted = false;
    let mut escaped = false;
    let (mut opens, mut closes) = (0, 0);
    for c in code(line).chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '{' if !quoted => opens += 1,
            '}' if !quoted => closes += 1,
            _ => {}
        }
    }
    (opens, closes)
}

fn indentation(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

fn line_ending(line: &str) -> &'static str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENTS: &str = "\
client localhost {
    ipaddr = 127.0.0.1
    secret = testing123
}

client mikrotik {
    ipaddr = 0.0.0.0/0
    secret = old-secret   # rotated by hand
    shortname = mikrotik
    limit {
        secret = nested
    }
}
";

    #[test]
    fn ini_value_is_replaced_in_place() {
        let text = "[api]\nport = 5000\n  auth_token=abc\nlog = info\n";
        let out = set_ini_value(text, "auth_token", "tok123");
        assert_eq!(out, "[api]\nport = 5000\n  auth_token = tok123\nlog = info\n");
        assert_eq!(ini_value(&out, "auth_token"), Some("tok123"));
    }

    #[test]
    fn ini_value_is_appended_when_absent() {
        assert_eq!(set_ini_value("port = 5000", "auth_token", "t"), "port = 5000\nauth_token = t\n");
        assert_eq!(set_ini_value("", "auth_token", "t"), "auth_token = t\n");
    }

    #[test]
    fn ini_prefix_keys_are_not_confused() {
        let text = "auth_token_ttl = 60\n";
        let out = set_ini_value(text, "auth_token", "t");
        assert_eq!(out, "auth_token_ttl = 60\nauth_token = t\n");
    }

    #[test]
    fn ini_edit_is_idempotent() {
        let once = set_ini_value("auth_token = a\n", "auth_token", "tok123");
        assert_eq!(set_ini_value(&once, "auth_token", "tok123"), once);
    }

    #[test]
    fn only_the_named_block_changes() {
        let out = set_client_secret(CLIENTS, "mikrotik", "s3cr3t").unwrap();
        assert!(out.contains("client localhost {\n    ipaddr = 127.0.0.1\n    secret = testing123\n}"));
        assert!(out.contains("    secret = s3cr3t\n    shortname = mikrotik"));
        assert!(out.contains("        secret = nested\n"));
        assert!(!out.contains("old-secret"));
    }

    #[test]
    fn client_secret_edit_is_idempotent() {
        let once = set_client_secret(CLIENTS, "mikrotik", "s3cr3t").unwrap();
        let twice = set_client_secret(&once, "mikrotik", "s3cr3t").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_secret_line_is_inserted_before_close() {
        let text = "client mikrotik {\n\tipaddr = 0.0.0.0/0\n}\n";
        let out = set_client_secret(text, "mikrotik", "abc").unwrap();
        assert_eq!(out, "client mikrotik {\n\tipaddr = 0.0.0.0/0\n\tsecret = abc\n}\n");
    }

    #[test]
    fn brace_on_following_line_is_handled() {
        let text = "client mikrotik\n{\n    secret = a\n}\n";
        let out = set_client_secret(text, "mikrotik", "b").unwrap();
        assert_eq!(out, "client mikrotik\n{\n    secret = b\n}\n");
    }

    #[test]
    fn unusual_secrets_are_quoted() {
        let out = set_client_secret(CLIENTS, "mikrotik", "a b\"c").unwrap();
        assert!(out.contains(r#"secret = "a b\"c""#));
        assert_eq!(conf_value("plain-Word_1"), "plain-Word_1");
        assert_eq!(conf_value(""), "\"\"");
    }

    #[test]
    fn braces_inside_quotes_do_not_end_the_block() {
        let text = "client mikrotik {\n    secret = \"x}y\"\n    nastype = other\n}\n";
        let out = set_client_secret(text, "mikrotik", "z").unwrap();
        assert_eq!(out, "client mikrotik {\n    secret = z\n    nastype = other\n}\n");
    }

    #[test]
    fn client_secret_reads_one_block() {
        assert_eq!(client_secret(CLIENTS, "localhost").as_deref(), Some("testing123"));
        assert_eq!(client_secret(CLIENTS, "mikrotik").as_deref(), Some("old-secret"));
        assert_eq!(client_secret(CLIENTS, "unifi"), None);
        assert_eq!(client_secret("client localhost {\n}\n", "localhost"), None);
    }

    #[test]
    fn quoted_secrets_read_back_unescaped() {
        let out = set_client_secret(CLIENTS, "localhost", "a b\"c\\d").unwrap();
        assert_eq!(client_secret(&out, "localhost").as_deref(), Some("a b\"c\\d"));
    }

    #[test]
    fn malformed_files_are_rejected() {
        assert_eq!(
            set_client_secret(CLIENTS, "unifi", "x"),
            Err(EditError::BlockNotFound("unifi".into()))
        );
        assert_eq!(
            set_client_secret("client mikrotik {\n    secret = a\n", "mikrotik", "x"),
            Err(EditError::UnterminatedBlock("mikrotik".into()))
        );
        assert_eq!(
            set_client_secret("client mikrotik { secret = a }\n", "mikrotik", "x"),
            Err(EditError::InlineBlock("mikrotik".into()))
        );
    }
}
