//! RFC 6570 URI template expansion.
//!
//! Thing Description hrefs may carry level-3 templates such as
//! `http://device.local/props/{id}{?step,unit}`; the dispatch layer expands them against the
//! runtime-supplied uri-variables of an interaction. Variables missing from the map are simply
//! skipped, as the RFC mandates.

use std::collections::HashMap;
use std::fmt::Write;

/// Per-operator expansion behavior, straight from the RFC 6570 operator table.
struct Operator {
    first: &'static str,
    separator: &'static str,
    named: bool,
    empty_equals: bool,
    allow_reserved: bool,
}

fn operator(expression: &str) -> (Operator, &str) {
    let (op, vars) = match expression.as_bytes().first() {
        Some(b'+') => (
            Operator {
                first: "",
                separator: ",",
                named: false,
                empty_equals: false,
                allow_reserved: true,
            },
            &expression[1..],
        ),
        Some(b'#') => (
            Operator {
                first: "#",
                separator: ",",
                named: false,
                empty_equals: false,
                allow_reserved: true,
            },
            &expression[1..],
        ),
        Some(b'.') => (
            Operator {
                first: ".",
                separator: ".",
                named: false,
                empty_equals: false,
                allow_reserved: false,
            },
            &expression[1..],
        ),
        Some(b'/') => (
            Operator {
                first: "/",
                separator: "/",
                named: false,
                empty_equals: false,
                allow_reserved: false,
            },
            &expression[1..],
        ),
        Some(b';') => (
            Operator {
                first: ";",
                separator: ";",
                named: true,
                empty_equals: false,
                allow_reserved: false,
            },
            &expression[1..],
        ),
        Some(b'?') => (
            Operator {
                first: "?",
                separator: "&",
                named: true,
                empty_equals: true,
                allow_reserved: false,
            },
            &expression[1..],
        ),
        Some(b'&') => (
            Operator {
                first: "&",
                separator: "&",
                named: true,
                empty_equals: true,
                allow_reserved: false,
            },
            &expression[1..],
        ),
        _ => (
            Operator {
                first: "",
                separator: ",",
                named: false,
                empty_equals: false,
                allow_reserved: false,
            },
            expression,
        ),
    };
    (op, vars)
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn is_reserved(byte: u8) -> bool {
    matches!(
        byte,
        b':' | b'/'
            | b'?'
            | b'#'
            | b'['
            | b']'
            | b'@'
            | b'!'
            | b'$'
            | b'&'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
            | b'='
    )
}

fn encode_into(out: &mut String, value: &str, allow_reserved: bool) {
    for &byte in value.as_bytes() {
        if is_unreserved(byte) || (allow_reserved && (is_reserved(byte) || byte == b'%')) {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
}

fn expand_expression(out: &mut String, expression: &str, variables: &HashMap<String, String>) {
    let (op, names) = operator(expression);

    let mut first = true;
    for name in names.split(',') {
        let name = name.trim();
        let Some(value) = variables.get(name) else {
            continue;
        };

        out.push_str(if first { op.first } else { op.separator });
        first = false;

        if op.named {
            out.push_str(name);
            if value.is_empty() {
                if op.empty_equals {
                    out.push('=');
                }
                continue;
            }
            out.push('=');
        }
        encode_into(out, value, op.allow_reserved);
    }
}

/// Expand `template` against `variables`.
///
/// Returns `None` when expansion is the identity (no expressions, or nothing substituted), so
/// callers can keep using the original string without allocating a replacement.
pub fn expand(template: &str, variables: &HashMap<String, String>) -> Option<String> {
    if !template.contains('{') {
        return None;
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                expand_expression(&mut out, &after[..close], variables);
                rest = &after[close + 1..];
            }
            None => {
                // Unterminated expression, keep it literally.
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    (out != template).then_some(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn simple_expansion() {
        let v = vars(&[("var", "value"), ("hello", "Hello World!")]);
        assert_eq!(expand("{var}", &v).unwrap(), "value");
        assert_eq!(expand("{hello}", &v).unwrap(), "Hello%20World%21");
        assert_eq!(expand("/p/{var}/x", &v).unwrap(), "/p/value/x");
    }

    #[test]
    fn reserved_expansion() {
        let v = vars(&[("path", "/foo/bar")]);
        assert_eq!(expand("{+path}/here", &v).unwrap(), "/foo/bar/here");
        assert_eq!(expand("{path}/here", &v).unwrap(), "%2Ffoo%2Fbar/here");
    }

    #[test]
    fn query_expansion() {
        let v = vars(&[("x", "1024"), ("y", "768")]);
        assert_eq!(expand("/map{?x,y}", &v).unwrap(), "/map?x=1024&y=768");
        assert_eq!(expand("/map?fixed=yes{&x}", &v).unwrap(), "/map?fixed=yes&x=1024");
    }

    #[test]
    fn path_and_matrix_expansion() {
        let v = vars(&[("var", "value"), ("empty", "")]);
        assert_eq!(expand("{/var}", &v).unwrap(), "/value");
        assert_eq!(expand("{;var}", &v).unwrap(), ";var=value");
        assert_eq!(expand("{;empty}", &v).unwrap(), ";empty");
        assert_eq!(expand("{?empty}", &v).unwrap(), "?empty=");
    }

    #[test]
    fn missing_variables_are_skipped() {
        let v = vars(&[("x", "1")]);
        assert_eq!(expand("/map{?x,y}", &v).unwrap(), "/map?x=1");
        // Everything undefined: the whole expression vanishes.
        assert_eq!(expand("/map{?y,z}", &v).unwrap(), "/map");
    }

    #[test]
    fn identity_is_signalled() {
        let v = vars(&[("id", "1")]);
        assert!(expand("http://h/no/templates", &v).is_none());
        assert!(expand("http://h/no/templates", &HashMap::new()).is_none());
    }

    #[test]
    fn unterminated_expression_kept_literal() {
        let v = vars(&[("id", "1")]);
        assert!(expand("http://h/{id", &v).is_none());
    }
}
