//! Wildcard matching for trust rules.
//!
//! `*` matches any run of characters and `?` matches exactly one.

/// Whether case matters when comparing literal characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Case {
    Sensitive,
    Insensitive,
}

pub(crate) fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

pub(crate) fn matches_wildcards(text: &str, pattern: &str, case: Case) -> bool {
    let text: Vec<char> = fold(text, case);
    let pattern: Vec<char> = fold(pattern, case);

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&wanted) if wanted == '?' || text.get(t) == Some(&wanted) => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }
    pattern.get(p..).is_some_and(|rest| rest.iter().all(|c| *c == '*'))
}

fn fold(text: &str, case: Case) -> Vec<char> {
    match case {
        Case::Sensitive => text.chars().collect(),
        Case::Insensitive => text.chars().flat_map(char::to_lowercase).collect(),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("192.168.1.5", "192.168.*", Case::Insensitive, true)]
    #[case("host.example.com", "*.EXAMPLE.com", Case::Insensitive, true)]
    #[case("host.example.com", "*.EXAMPLE.com", Case::Sensitive, false)]
    #[case("abc", "a?c", Case::Sensitive, true)]
    #[case("abc", "a?", Case::Sensitive, false)]
    #[case("", "*", Case::Sensitive, true)]
    #[case("aXbXc", "a*b*c", Case::Sensitive, true)]
    #[case("aXbXd", "a*b*c", Case::Sensitive, false)]
    #[case("anything", "**", Case::Sensitive, true)]
    fn matches(
        #[case] text: &str,
        #[case] pattern: &str,
        #[case] case: Case,
        #[case] expected: bool,
    ) {
        assert_eq!(matches_wildcards(text, pattern, case), expected);
    }

    #[rstest]
    fn detects_wildcards() {
        assert!(has_wildcard("tcp*"));
        assert!(has_wildcard("h?st"));
        assert!(!has_wildcard("host"));
    }
}
