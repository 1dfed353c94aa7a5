//! Line-level lexical helpers for the IR text format.

/// Strips a trailing `#` comment.
pub(crate) fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Parses an unsigned integer, decimal or `0x`-prefixed hex.
pub(crate) fn parse_u64(token: &str) -> Option<u64> {
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}

/// Parses an unsigned 32-bit integer, decimal or `0x`-prefixed hex.
pub(crate) fn parse_u32(token: &str) -> Option<u32> {
    parse_u64(token).and_then(|v| u32::try_from(v).ok())
}

/// Splits a `base:offset:length` field spec into its raw components.
pub(crate) fn split_field(token: &str) -> Option<(&str, &str, &str)> {
    let mut parts = token.splitn(3, ':');
    let base = parts.next()?;
    let offset = parts.next()?;
    let length = parts.next()?;
    if base.is_empty() || offset.is_empty() || length.is_empty() {
        return None;
    }
    Some((base, offset, length))
}

/// Splits a `base+(field)` offset expression into base and field specs.
pub(crate) fn split_offset_expr(token: &str) -> Option<(&str, &str)> {
    let (base, rest) = token.split_once("+(")?;
    let field = rest.strip_suffix(')')?;
    if base.is_empty() || field.is_empty() {
        return None;
    }
    Some((base, field))
}

/// Splits a record tail at the `pragma` keyword, returning the head tokens
/// and the pragma words.
pub(crate) fn split_pragma<'a>(tokens: &'a [&'a str]) -> (&'a [&'a str], Vec<String>) {
    match tokens.iter().position(|&t| t == "pragma") {
        Some(pos) => (
            &tokens[..pos],
            tokens[pos + 1..].iter().map(|&w| w.to_string()).collect(),
        ),
        None => (tokens, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comment() {
        assert_eq!(strip_comment("bucket 1 = 1 2 3 4 0 # tail"), "bucket 1 = 1 2 3 4 0 ");
        assert_eq!(strip_comment("# whole line"), "");
        assert_eq!(strip_comment("no comment"), "no comment");
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_u64("1000"), Some(1000));
        assert_eq!(parse_u64("0x800"), Some(0x800));
        assert_eq!(parse_u64("0X10"), Some(16));
        assert_eq!(parse_u64("0x"), None);
        assert_eq!(parse_u64("12ab"), None);
        assert_eq!(parse_u64("-4"), None);
        assert_eq!(parse_u32("0xffffffff"), Some(u32::MAX));
        assert_eq!(parse_u32("0x100000000"), None);
    }

    #[test]
    fn test_split_field() {
        assert_eq!(split_field("0:32:8"), Some(("0", "32", "8")));
        assert_eq!(split_field("meta:0:16"), Some(("meta", "0", "16")));
        assert_eq!(split_field("0:32"), None);
        assert_eq!(split_field("::8"), None);
    }

    #[test]
    fn test_split_offset_expr() {
        assert_eq!(split_offset_expr("0+(0:32:8)"), Some(("0", "0:32:8")));
        assert_eq!(split_offset_expr("meta+(0:0:16)"), Some(("meta", "0:0:16")));
        assert_eq!(split_offset_expr("0+0:32:8"), None);
        assert_eq!(split_offset_expr("+(0:32:8)"), None);
    }

    #[test]
    fn test_split_pragma() {
        let tokens = ["rate", "1000", "pragma", "a", "b"];
        let (head, words) = split_pragma(&tokens);
        assert_eq!(head, ["rate", "1000"]);
        assert_eq!(words, ["a", "b"]);

        let tokens = ["rate", "1000"];
        let (head, words) = split_pragma(&tokens);
        assert_eq!(head, ["rate", "1000"]);
        assert!(words.is_empty());
    }
}
