//! The domains file is one entry per line, co-edited by humans and shell
//! scripts, so the parser is tolerant: anything it can't make sense of is
//! skipped rather than reported.
//!
//! ```text
//! example.com www.example.com
//! *.service.example.org service.example.org > svc_org
//! service.example.net *.service.example.net < Multi-SAN
//! # inactive.example.net
//! ```

use tracing::debug;

use crate::domain::{check_valid_alias, check_valid_domain, DomainEntry};

/// Token introducing the alias
const ALIAS_MARKER: &str = ">";
/// Token introducing the comment, which runs to end of line
const COMMENT_MARKER: &str = "<";

/// Parse a whole domains file. Unparseable lines are dropped silently.
pub fn parse(content: &str) -> Vec<DomainEntry> {
    content.lines().filter_map(parse_line).collect()
}

/// Parse one line into an entry.
///
/// A leading `#` marks a disabled entry when the rest of the line is an
/// otherwise valid entry; any other `#` line is a comment. Because English
/// prose is made of tokens that also pass the single-label grammar
/// ("check", "later"), a `#`-led line only counts as an entry when every
/// name on it is a dotted name; bare words make it a comment. Returns None
/// for blank lines, comments, and lines that fail validation.
pub fn parse_line(line: &str) -> Option<DomainEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (body, enabled) = match trimmed.strip_prefix('#') {
        Some(rest) => (rest.trim_start(), false),
        None => (trimmed, true),
    };
    if body.is_empty() {
        return None;
    }

    // single-label names are fine on live lines, but on a `#` line they are
    // indistinguishable from prose
    let is_name = |name: &str| check_valid_domain(name).is_ok() && (enabled || name.contains('.'));

    let mut tokens = body.split_whitespace();
    let domain = tokens.next()?;
    if !is_name(domain) {
        debug!("Skipping line with invalid primary domain: {line:?}");
        return None;
    }

    let mut alternative_names: Vec<String> = Vec::new();
    let mut alias: Option<String> = None;
    let mut comment: Option<String> = None;

    while let Some(token) = tokens.next() {
        match token {
            ALIAS_MARKER => {
                let value = tokens.next()?;
                if check_valid_alias(value).is_err() {
                    debug!("Skipping line with invalid alias: {line:?}");
                    return None;
                }
                alias = Some(value.to_string());
                // only a comment may follow the alias
                match tokens.next() {
                    None => break,
                    Some(COMMENT_MARKER) => {
                        comment = Some(rest_of_line(tokens));
                        break;
                    }
                    Some(other) => {
                        debug!("Skipping line with trailing token {other:?}: {line:?}");
                        return None;
                    }
                }
            }
            COMMENT_MARKER => {
                comment = Some(rest_of_line(tokens));
                break;
            }
            name => {
                if !is_name(name) {
                    debug!("Skipping line with invalid alternative name: {line:?}");
                    return None;
                }
                alternative_names.push(name.to_string());
            }
        }
    }

    // a `<` with nothing after it
    if comment.as_deref() == Some("") {
        return None;
    }

    Some(DomainEntry {
        domain: domain.to_string(),
        alternative_names,
        alias,
        enabled,
        comment,
        metadata: Default::default(),
    })
}

fn rest_of_line<'a>(tokens: impl Iterator<Item = &'a str>) -> String {
    tokens.collect::<Vec<_>>().join(" ")
}

/// Emit the whole file, entries in slice order, trailing newline included.
pub fn emit(entries: &[DomainEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&emit_entry(entry));
        out.push('\n');
    }
    out
}

/// Emit a single entry as its file line, without the newline.
pub fn emit_entry(entry: &DomainEntry) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(entry.alternative_names.len() + 5);
    parts.push(&entry.domain);
    for name in &entry.alternative_names {
        parts.push(name);
    }
    if let Some(alias) = &entry.alias {
        parts.push(ALIAS_MARKER);
        parts.push(alias);
    }
    if let Some(comment) = &entry.comment {
        parts.push(COMMENT_MARKER);
        parts.push(comment);
    }
    let line = parts.join(" ");
    match entry.enabled {
        true => line,
        false => format!("# {line}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(domain: &str) -> DomainEntry {
        DomainEntry {
            domain: domain.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_bare_domain() {
        let parsed = parse_line("example.com").expect("should parse");
        assert_eq!(parsed, entry("example.com"));
        assert!(parsed.enabled);
    }

    #[test]
    fn test_parse_alternative_names() {
        let parsed = parse_line("example.com www.example.com mail.example.com")
            .expect("should parse");
        assert_eq!(
            parsed.alternative_names,
            vec!["www.example.com", "mail.example.com"]
        );
    }

    #[test]
    fn test_parse_alias() {
        let parsed =
            parse_line("*.service.example.org service.example.org > svc_org").expect("should parse");
        assert_eq!(parsed.domain, "*.service.example.org");
        assert_eq!(parsed.alias.as_deref(), Some("svc_org"));
        assert_eq!(parsed.comment, None);
    }

    #[test]
    fn test_parse_comment_runs_to_eol() {
        let parsed = parse_line("service.example.net *.service.example.net < Multi-SAN setup")
            .expect("should parse");
        assert_eq!(parsed.comment.as_deref(), Some("Multi-SAN setup"));
    }

    #[test]
    fn test_parse_alias_then_comment() {
        let parsed = parse_line("example.com > prod < the main cert").expect("should parse");
        assert_eq!(parsed.alias.as_deref(), Some("prod"));
        assert_eq!(parsed.comment.as_deref(), Some("the main cert"));
    }

    #[test]
    fn test_disabled_entry() {
        let parsed = parse_line("# inactive.example.net").expect("should parse");
        assert_eq!(parsed.domain, "inactive.example.net");
        assert!(!parsed.enabled);
    }

    #[test]
    fn test_disabled_entry_with_names_and_alias() {
        let parsed =
            parse_line("# old.example.net www.old.example.net > legacy").expect("should parse");
        assert!(!parsed.enabled);
        assert_eq!(parsed.alternative_names, vec!["www.old.example.net"]);
        assert_eq!(parsed.alias.as_deref(), Some("legacy"));
    }

    #[test]
    fn test_plain_comment_skipped() {
        assert_eq!(parse_line("# this is just a comment with words"), None);
        assert_eq!(parse_line("#"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn test_prose_mentioning_domains_skipped() {
        // a dotted word somewhere in a sentence doesn't make it an entry
        assert_eq!(parse_line("# see example.com for details"), None);
        assert_eq!(parse_line("# foo.example.com is broken"), None);
        assert_eq!(parse_line("# renew the certs in domains.txt later"), None);
    }

    #[test]
    fn test_single_label_names() {
        // fine on a live line
        let parsed = parse_line("localhost").expect("should parse");
        assert_eq!(parsed.domain, "localhost");
        // but under `#` a bare word reads as prose, not a disabled entry
        assert_eq!(parse_line("# localhost"), None);
    }

    #[test]
    fn test_invalid_domain_skipped() {
        assert_eq!(parse_line("not valid!"), None);
        assert_eq!(parse_line("-bad.example.com www.example.com"), None);
    }

    #[test]
    fn test_trailing_garbage_skipped() {
        // a second alias marker makes no sense
        assert_eq!(parse_line("example.com > one > two"), None);
        // dangling alias marker
        assert_eq!(parse_line("example.com >"), None);
    }

    #[test]
    fn test_parse_mixed_file() {
        let content = "example.com www.example.com\n\
            *.service.example.org service.example.org > svc_org\n\
            service.example.net *.service.example.net < Multi-SAN\n\
            # inactive.example.net\n";
        let entries = parse(content);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].domain, "example.com");
        assert_eq!(entries[1].alias.as_deref(), Some("svc_org"));
        assert_eq!(entries[2].comment.as_deref(), Some("Multi-SAN"));
        assert!(!entries[3].enabled);
    }

    #[test]
    fn test_mixed_garbage_keeps_valid_lines() {
        let content = "example.com\nthis is ! not a domain\n# a comment\nother.example.org\n";
        let entries = parse(content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].domain, "example.com");
        assert_eq!(entries[1].domain, "other.example.org");
    }

    #[test]
    fn test_round_trip() {
        let mut aliased = entry("example.com");
        aliased.alias = Some("rsa".to_string());
        let mut disabled = entry("old.example.net");
        disabled.enabled = false;
        disabled.comment = Some("retired 2024".to_string());
        let mut full = entry("*.service.example.org");
        full.alternative_names = vec!["service.example.org".to_string()];
        full.alias = Some("svc_org".to_string());
        full.comment = Some("wildcard plus apex".to_string());

        let entries = vec![entry("example.com"), aliased, disabled, full];
        assert_eq!(parse(&emit(&entries)), entries);
    }

    #[test]
    fn test_emit_single_token() {
        assert_eq!(emit_entry(&entry("example.com")), "example.com");
    }

    #[test]
    fn test_emit_disabled_prefix() {
        let mut disabled = entry("example.com");
        disabled.enabled = false;
        assert_eq!(emit_entry(&disabled), "# example.com");
    }
}
