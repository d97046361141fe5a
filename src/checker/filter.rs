use crate::cluster::ResourceItem;
use glob::{MatchOptions, Pattern};
use std::{iter::Peekable, str::Chars};
use thiserror::Error;
use tracing::error;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
enum PatternSyntaxError {
    #[error("trailing escape character")]
    TrailingEscape,
    #[error("unterminated character class")]
    UnterminatedClass,
    #[error("unescaped '{0}' in character class")]
    UnescapedInClass(char),
    #[error("invalid character range {0}-{1}")]
    InvalidRange(char, char),
    #[error("{0}")]
    Glob(String),
}

#[derive(Debug, Clone)]
enum CompiledPattern {
    Valid(Pattern),
    Invalid {
        raw: String,
        error: PatternSyntaxError,
    },
}

impl CompiledPattern {
    fn compile(raw: &str) -> Self {
        let compiled = translate(raw).and_then(|translated| {
            Pattern::new(&translated).map_err(|e| PatternSyntaxError::Glob(e.to_string()))
        });

        match compiled {
            Ok(pattern) => Self::Valid(pattern),
            Err(error) => Self::Invalid {
                raw: raw.to_string(),
                error,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassItem {
    Single(char),
    Range(char, char),
}

/// Rewrite a shell pattern into `glob` syntax
///
/// Accepted syntax: `*` (runs collapse to one), `?`, `\x` escapes and
/// `[..]` classes negated with `^`. Inside a class `-` and `]` must be
/// escaped to be literal, and `!` has no special meaning.
fn translate(raw: &str) -> Result<String, PatternSyntaxError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                while chars.next_if_eq(&'*').is_some() {}
                out.push('*');
            }
            '\\' => {
                let escaped = chars.next().ok_or(PatternSyntaxError::TrailingEscape)?;
                push_literal(&mut out, escaped);
            }
            '[' => {
                let negated = chars.next_if_eq(&'^').is_some();
                let items = parse_class(&mut chars)?;
                push_class(&mut out, negated, &items);
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    if matches!(c, '*' | '?' | '[') {
        out.push('[');
        out.push(c);
        out.push(']');
    } else {
        out.push(c);
    }
}

fn parse_class(chars: &mut Peekable<Chars<'_>>) -> Result<Vec<ClassItem>, PatternSyntaxError> {
    let mut items = Vec::new();

    loop {
        if !items.is_empty() && chars.next_if_eq(&']').is_some() {
            return Ok(items);
        }

        let lo = class_char(chars)?;
        if chars.next_if_eq(&'-').is_some() {
            let hi = class_char(chars)?;
            if hi < lo {
                return Err(PatternSyntaxError::InvalidRange(lo, hi));
            }
            items.push(ClassItem::Range(lo, hi));
        } else {
            items.push(ClassItem::Single(lo));
        }
    }
}

fn class_char(chars: &mut Peekable<Chars<'_>>) -> Result<char, PatternSyntaxError> {
    match chars.next() {
        None => Err(PatternSyntaxError::UnterminatedClass),
        Some(c @ ('-' | ']')) => Err(PatternSyntaxError::UnescapedInClass(c)),
        Some('\\') => chars.next().ok_or(PatternSyntaxError::UnterminatedClass),
        Some(c) => Ok(c),
    }
}

/// Split ranges so `!`, `-` and `]` only ever appear as single characters or
/// as the start of a leading `]` range, the only positions `glob` reads them
/// literally.
fn split_item(item: ClassItem, out: &mut Vec<ClassItem>) {
    match item {
        ClassItem::Range(lo, hi) if lo == hi => out.push(ClassItem::Single(lo)),
        ClassItem::Range('!', hi) => {
            out.push(ClassItem::Single('!'));
            split_item(ClassItem::Range('"', hi), out);
        }
        ClassItem::Range('-', hi) => {
            out.push(ClassItem::Single('-'));
            split_item(ClassItem::Range('.', hi), out);
        }
        ClassItem::Range(lo, ']') => {
            out.push(ClassItem::Single(']'));
            split_item(ClassItem::Range(lo, '\\'), out);
        }
        other => out.push(other),
    }
}

fn push_class(out: &mut String, negated: bool, items: &[ClassItem]) {
    let mut split = Vec::new();
    for &item in items {
        split_item(item, &mut split);
    }

    // `]` or `]-x` must come first, `-` last, and `!` may not open the class
    let mut leading: Option<char> = None;
    let mut body = String::new();
    let mut bang = false;
    let mut dash = false;

    for item in split {
        match item {
            ClassItem::Single(']') => leading = Some(leading.unwrap_or(']')),
            ClassItem::Range(']', hi) => leading = Some(leading.map_or(hi, |h| h.max(hi))),
            ClassItem::Single('!') => bang = true,
            ClassItem::Single('-') => dash = true,
            ClassItem::Single(c) => body.push(c),
            ClassItem::Range(lo, hi) => {
                body.push(lo);
                body.push('-');
                body.push(hi);
            }
        }
    }

    if !negated && leading.is_none() && body.is_empty() && bang && !dash {
        out.push('!');
        return;
    }

    out.push('[');
    if negated {
        out.push('!');
    }
    match leading {
        Some(']') => out.push(']'),
        Some(hi) => {
            out.push(']');
            out.push('-');
            out.push(hi);
        }
        None => {}
    }
    if !negated && leading.is_none() && body.is_empty() {
        // only `-` and `!` remain; `-` opens so `!` is not read as negation
        out.push('-');
        dash = false;
    }
    out.push_str(&body);
    if bang {
        out.push('!');
    }
    if dash {
        out.push('-');
    }
    out.push(']');
}

/// Ordered list of shell-style patterns
///
/// Patterns are compiled once. A pattern that fails to compile never matches,
/// and is reported every time an evaluation reaches it.
#[derive(Debug, Clone, Default)]
pub struct GlobFilter {
    patterns: Vec<CompiledPattern>,
}

/// Result of evaluating a [`GlobFilter`] against one name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobMatch {
    pub matched: bool,
    /// Malformed patterns reached during evaluation
    pub errors: u64,
}

impl GlobFilter {
    #[must_use]
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|raw| CompiledPattern::compile(raw.as_ref()))
            .collect();

        Self { patterns }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Evaluate patterns in order, stopping at the first match
    #[must_use]
    pub fn matches(&self, name: &str) -> GlobMatch {
        let mut result = GlobMatch::default();

        for pattern in &self.patterns {
            match pattern {
                CompiledPattern::Valid(pattern) => {
                    if pattern.matches_with(name, MATCH_OPTIONS) {
                        result.matched = true;
                        break;
                    }
                }
                CompiledPattern::Invalid { raw, error } => {
                    error!(pattern = %raw, name = %name, "Error matching glob pattern: {error}");
                    result.errors += 1;
                }
            }
        }

        result
    }
}

/// Include/exclude outcome for one data entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterDecision {
    pub included: bool,
    pub excluded: bool,
    pub errors: u64,
}

impl FilterDecision {
    #[must_use]
    pub const fn is_selected(&self) -> bool {
        self.included && !self.excluded
    }
}

/// Include and exclude globs applied to data entry names
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    include: GlobFilter,
    exclude: GlobFilter,
}

impl EntryFilter {
    #[must_use]
    pub const fn new(include: GlobFilter, exclude: GlobFilter) -> Self {
        Self { include, exclude }
    }

    /// Both lists are always evaluated so every malformed pattern is reported
    #[must_use]
    pub fn decide(&self, name: &str) -> FilterDecision {
        let include = self.include.matches(name);
        let exclude = self.exclude.matches(name);

        FilterDecision {
            included: include.matched,
            excluded: exclude.matched,
            errors: include.errors + exclude.errors,
        }
    }
}

/// True when `allowlist` is empty or contains the item's type
#[must_use]
pub fn type_allowed(item: &ResourceItem, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }

    item.resource_type
        .as_deref()
        .is_some_and(|kind| allowlist.iter().any(|allowed| allowed == kind))
}

/// True when `selectors` is empty or any selector key is an annotation of the
/// item. Annotation values are ignored.
#[must_use]
pub fn annotations_match(item: &ResourceItem, selectors: &[String]) -> bool {
    selectors.is_empty()
        || selectors
            .iter()
            .any(|selector| item.annotations.contains_key(selector))
}
