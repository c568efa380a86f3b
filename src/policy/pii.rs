use regex::Regex;
use std::sync::OnceLock;

/// Pattern kinds in masking precedence order: SSN before phone so the
/// 3-2-4 digit shape is not half-consumed by the phone pattern, credit
/// cards before IPv4 so digit runs collapse to one token.
const PATTERNS: &[(&str, &str, &str)] = &[
    (
        "email",
        r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        "***@***.***",
    ),
    ("ssn", r"\b\d{3}-\d{2}-\d{4}\b", "***-**-****"),
    (
        "credit_card",
        r"\b\d{4}[- ]\d{4}[- ]\d{4}[- ]\d{4}\b",
        "**** **** **** ****",
    ),
    (
        "phone",
        r"\b(?:\+?1[-. ])?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b",
        "***-***-****",
    ),
    ("ipv4", r"\b(?:\d{1,3}\.){3}\d{1,3}\b", "*.*.*.*"),
];

fn compiled() -> &'static Vec<(&'static str, Regex, &'static str)> {
    static COMPILED: OnceLock<Vec<(&'static str, Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .map(|(kind, pattern, replacement)| {
                (
                    *kind,
                    Regex::new(pattern).unwrap_or_else(|err| {
                        panic!("invalid builtin pii pattern `{kind}`: {err}")
                    }),
                    *replacement,
                )
            })
            .collect()
    })
}

/// Returns the kinds of PII detected in `content`, in precedence order.
pub fn detect(content: &str) -> Vec<&'static str> {
    compiled()
        .iter()
        .filter(|(_, regex, _)| regex.is_match(content))
        .map(|(kind, _, _)| *kind)
        .collect()
}

/// Redacted copy of `content` with every matched pattern replaced.
pub fn mask(content: &str) -> String {
    let mut masked = content.to_string();
    for (_, regex, replacement) in compiled() {
        masked = regex.replace_all(&masked, *replacement).into_owned();
    }
    masked
}
