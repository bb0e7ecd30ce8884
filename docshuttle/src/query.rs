use serde::Serialize;

/// Represents ways to locate elements on the driven page.
///
/// Queries are declarative: the backend decides how to evaluate them
/// (the DevTools backend compiles them to an in-page interpreter call).
/// Text comparisons are whitespace-normalized and case-insensitive
/// everywhere, because the target UIs render the same label with
/// varying padding across tenant deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "spec", rename_all = "snake_case")]
pub enum Query {
    /// CSS selector (comma lists allowed).
    Css(String),
    /// XPath expression.
    XPath(String),
    /// Match elements whose rendered text matches the needle.
    Text { needle: String, exact: bool },
    /// Elements matching `base` (CSS) whose own or descendant text matches.
    HasText {
        base: String,
        needle: String,
        exact: bool,
    },
    /// Inner query evaluated only inside elements matching the outer query.
    Within(Box<Query>, Box<Query>),
    /// Ordered alternatives; the first member with any match wins.
    AnyOf(Vec<Query>),
}

impl Query {
    pub fn css(s: impl Into<String>) -> Self {
        Query::Css(s.into())
    }

    pub fn text_exact(s: impl Into<String>) -> Self {
        Query::Text {
            needle: s.into(),
            exact: true,
        }
    }

    pub fn text_contains(s: impl Into<String>) -> Self {
        Query::Text {
            needle: s.into(),
            exact: false,
        }
    }

    pub fn has_text(base: impl Into<String>, needle: impl Into<String>, exact: bool) -> Self {
        Query::HasText {
            base: base.into(),
            needle: needle.into(),
            exact,
        }
    }

    pub fn within(scope: Query, inner: Query) -> Self {
        Query::Within(Box::new(scope), Box::new(inner))
    }

    pub fn any_of(queries: Vec<Query>) -> Self {
        Query::AnyOf(queries)
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Query::Css(s) => write!(f, "css:{s}"),
            Query::XPath(s) => write!(f, "xpath:{s}"),
            Query::Text { needle, exact: true } => write!(f, "text:{needle}"),
            Query::Text {
                needle,
                exact: false,
            } => write!(f, "text~:{needle}"),
            Query::HasText {
                base,
                needle,
                exact,
            } => {
                let op = if *exact { "=" } else { "~" };
                write!(f, "has-text:{base}{op}{needle}")
            }
            Query::Within(scope, inner) => write!(f, "{scope} >> {inner}"),
            Query::AnyOf(queries) => {
                let parts: Vec<String> = queries.iter().map(|q| q.to_string()).collect();
                write!(f, "any-of:[{}]", parts.join(" | "))
            }
        }
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        let s = s.trim();
        match s {
            _ if s.starts_with("css:") => Query::Css(s[4..].to_string()),
            _ if s.starts_with("xpath:") => Query::XPath(s[6..].to_string()),
            _ if s.starts_with("//") => Query::XPath(s.to_string()),
            _ if s.starts_with("text~:") => Query::text_contains(&s[6..]),
            _ if s.starts_with("text:") => Query::text_exact(&s[5..]),
            // Bare strings are CSS, the overwhelmingly common case.
            _ => Query::Css(s.to_string()),
        }
    }
}

/// Collapse runs of whitespace and trim, the comparison form used for
/// every text match in the engine. Backends must apply the same
/// normalization so a query means the same thing everywhere.
pub fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-insensitive match of `haystack` against `needle`, exact or
/// substring, both sides whitespace-normalized.
pub fn text_matches(haystack: &str, needle: &str, exact: bool) -> bool {
    let haystack = normalize_text(haystack).to_lowercase();
    let needle = normalize_text(needle).to_lowercase();
    if exact {
        haystack == needle
    } else {
        haystack.contains(&needle)
    }
}
