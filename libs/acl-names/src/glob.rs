//! Glob patterns with `*` (any run, including empty) and `?` (exactly one
//! character). No character classes, no escapes.

use std::fmt;

/// A single compiled pattern element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
}

/// A precompiled glob pattern.
///
/// Equality, ordering and hashing are defined over the raw pattern text, so
/// two globs compare equal iff they were written identically.
#[derive(Clone)]
pub struct Glob {
    raw: String,
    tokens: Vec<Token>,
}

impl Glob {
    /// Compile a pattern. Consecutive `*` runs collapse into one token.
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let mut tokens = Vec::with_capacity(raw.len());
        for c in raw.chars() {
            match c {
                '*' => {
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                }
                '?' => tokens.push(Token::AnyChar),
                other => tokens.push(Token::Literal(other)),
            }
        }
        Self { raw, tokens }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the pattern contains no glob characters at all.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.tokens
            .iter()
            .all(|t| matches!(t, Token::Literal(_)))
    }

    /// Classic iterative glob match with `*` backtracking.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let chars: Vec<char> = candidate.chars().collect();
        let mut t = 0usize;
        let mut c = 0usize;
        let mut star: Option<(usize, usize)> = None;

        while c < chars.len() {
            match self.tokens.get(t) {
                Some(Token::Literal(l)) if *l == chars[c] => {
                    t += 1;
                    c += 1;
                }
                Some(Token::AnyChar) => {
                    t += 1;
                    c += 1;
                }
                Some(Token::AnyRun) => {
                    star = Some((t, c));
                    t += 1;
                }
                _ => match star {
                    Some((st, sc)) => {
                        t = st + 1;
                        c = sc + 1;
                        star = Some((st, sc + 1));
                    }
                    None => return false,
                },
            }
        }
        while self.tokens.get(t) == Some(&Token::AnyRun) {
            t += 1;
        }
        t == self.tokens.len()
    }

    /// Language containment: does `self` match every string `other` can match?
    ///
    /// Exact for this token alphabet: a `*` on the containing side absorbs any
    /// span of the contained pattern, a `?` absorbs any single element, and a
    /// literal only absorbs the same literal.
    #[must_use]
    pub fn contains(&self, other: &Glob) -> bool {
        fn go(a: &[Token], p: &[Token]) -> bool {
            match (a.first(), p.first()) {
                (None, None) => true,
                (None, Some(_)) => false,
                (Some(_), None) => a.iter().all(|t| *t == Token::AnyRun),
                (Some(Token::AnyRun), Some(_)) => go(&a[1..], p) || go(a, &p[1..]),
                (Some(_), Some(Token::AnyRun)) => false,
                (Some(Token::AnyChar), Some(_)) => go(&a[1..], &p[1..]),
                (Some(Token::Literal(_)), Some(Token::AnyChar)) => false,
                (Some(Token::Literal(x)), Some(Token::Literal(y))) => x == y && go(&a[1..], &p[1..]),
            }
        }
        go(&self.tokens, &other.tokens)
    }

    /// Structural intersection of two patterns, used when no universe of
    /// concrete names is available to enumerate.
    ///
    /// Containment short-circuits to the narrower pattern. Otherwise the
    /// result concatenates the more restrictive literal bounding of the two:
    /// the unified prefix up to the first `*`, a single `*`, and the unified
    /// suffix after the last `*`. Returns `None` when the bounds conflict.
    #[must_use]
    pub fn intersect(&self, other: &Glob) -> Option<Glob> {
        if self.contains(other) {
            return Some(other.clone());
        }
        if other.contains(self) {
            return Some(self.clone());
        }

        let a_star = self.tokens.iter().any(|t| *t == Token::AnyRun);
        let b_star = other.tokens.iter().any(|t| *t == Token::AnyRun);
        if !a_star || !b_star {
            // Without a star on both sides there is no span left to absorb
            // the other pattern's remainder; containment above was the only
            // way to a non-empty intersection.
            return None;
        }

        let prefix = unify_bound(prefix_of(&self.tokens), prefix_of(&other.tokens))?;
        let suffix = unify_bound(
            &reversed(suffix_of(&self.tokens)),
            &reversed(suffix_of(&other.tokens)),
        )
        .map(|s| reversed(&s))?;

        let mut merged = String::new();
        push_tokens(&mut merged, &prefix);
        merged.push('*');
        push_tokens(&mut merged, &suffix);
        Some(Glob::new(merged))
    }
}

fn prefix_of(tokens: &[Token]) -> &[Token] {
    let end = tokens
        .iter()
        .position(|t| *t == Token::AnyRun)
        .unwrap_or(tokens.len());
    &tokens[..end]
}

fn suffix_of(tokens: &[Token]) -> &[Token] {
    let start = tokens
        .iter()
        .rposition(|t| *t == Token::AnyRun)
        .map_or(0, |i| i + 1);
    &tokens[start..]
}

fn reversed(tokens: &[Token]) -> Vec<Token> {
    tokens.iter().rev().copied().collect()
}

/// Position-wise unification of two literal bounds. The longer bound wins as
/// long as the shorter one agrees on the shared positions; a literal beats
/// `?`, two different literals conflict.
fn unify_bound(a: &[Token], b: &[Token]) -> Option<Vec<Token>> {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut out = Vec::with_capacity(long.len());
    for (i, lt) in long.iter().enumerate() {
        match (short.get(i), lt) {
            (None, t) => out.push(*t),
            (Some(Token::AnyChar), t) => out.push(*t),
            (Some(t), Token::AnyChar) => out.push(*t),
            (Some(Token::Literal(x)), Token::Literal(y)) if x == y => {
                out.push(Token::Literal(*x));
            }
            _ => return None,
        }
    }
    Some(out)
}

fn push_tokens(out: &mut String, tokens: &[Token]) {
    for t in tokens {
        match t {
            Token::Literal(c) => out.push(*c),
            Token::AnyChar => out.push('?'),
            Token::AnyRun => out.push('*'),
        }
    }
}

impl fmt::Debug for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Glob({:?})", self.raw)
    }
}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Glob {}

impl PartialOrd for Glob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Glob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl std::hash::Hash for Glob {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn matches_star_and_question_mark() {
        assert!(Glob::new("test*").matches("test1_index"));
        assert!(Glob::new("test*").matches("test"));
        assert!(Glob::new("*logs*").matches("c01-logs-smg-stats"));
        assert!(Glob::new("t?st").matches("test"));
        assert!(!Glob::new("t?st").matches("teest"));
        assert!(!Glob::new("test*").matches("tes"));
    }

    #[test]
    fn star_backtracking() {
        assert!(Glob::new("a*b*c").matches("axxbyybzc"));
        assert!(!Glob::new("a*b*c").matches("axxbyyb"));
        assert!(Glob::new("*").matches(""));
        assert!(Glob::new("**").matches("anything"));
    }

    #[test]
    fn literal_detection() {
        assert!(Glob::new("plain_name").is_literal());
        assert!(!Glob::new("pla?n").is_literal());
        assert!(!Glob::new("plain*").is_literal());
    }

    #[test]
    fn containment() {
        assert!(Glob::new("t*1*").contains(&Glob::new("test1*")));
        assert!(!Glob::new("t*1*").contains(&Glob::new("test2*")));
        assert!(Glob::new("*").contains(&Glob::new("anything?even*this")));
        assert!(Glob::new("a*").contains(&Glob::new("ab")));
        assert!(!Glob::new("ab").contains(&Glob::new("a*")));
        assert!(Glob::new("a?").contains(&Glob::new("ab")));
        assert!(!Glob::new("ab").contains(&Glob::new("a?")));
        assert!(Glob::new("*a").contains(&Glob::new("ba")));
    }

    #[test]
    fn containment_is_reflexive() {
        for p in ["abc", "a*c", "a?c", "*", "a*b*c"] {
            let g = Glob::new(p);
            assert!(g.contains(&g), "{p} should contain itself");
        }
    }

    #[test]
    fn intersect_by_containment() {
        let wide = Glob::new("test*");
        let narrow = Glob::new("test1*");
        assert_eq!(wide.intersect(&narrow), Some(narrow.clone()));
        assert_eq!(narrow.intersect(&wide), Some(narrow));
    }

    #[test]
    fn intersect_structural_bounds() {
        let a = Glob::new("dev-*");
        let b = Glob::new("*-logs");
        let merged = a.intersect(&b).unwrap();
        assert_eq!(merged.as_str(), "dev-*-logs");
        assert!(merged.matches("dev-x-logs"));
    }

    #[test]
    fn intersect_conflicting_bounds() {
        let a = Glob::new("dev-*");
        let b = Glob::new("prod-*");
        assert_eq!(a.intersect(&b), None);
    }

    #[test]
    fn intersect_without_star_needs_containment() {
        let a = Glob::new("a?c");
        let b = Glob::new("abc");
        assert_eq!(a.intersect(&b), Some(b.clone()));
        assert_eq!(Glob::new("abd").intersect(&b), None);
    }
}
