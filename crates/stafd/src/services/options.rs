//! Request-string parsing shared by the built-in services.
//!
//! A request is a sequence of option names, some followed by a value.
//! Values are bare words, double-quoted strings with backslash escapes, or
//! `:len:text` where `len` counts the characters of `text` exactly. Option
//! names match case-insensitively.

use std::collections::BTreeMap;

use staf_proto::ReturnCode;

use super::ServiceResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    Flag,
    Value,
}

#[derive(Debug, Clone)]
struct OptionSpec {
    arity: Arity,
    max: Option<usize>,
}

/// Declares the options a request may contain.
#[derive(Debug, Clone, Default)]
pub(crate) struct OptionParser {
    options: BTreeMap<String, OptionSpec>,
}

impl OptionParser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// An option without a value that may appear once.
    pub(crate) fn flag(self, name: &str) -> Self {
        self.with(name, Arity::Flag, Some(1))
    }

    /// An option with a value that may appear once.
    pub(crate) fn value(self, name: &str) -> Self {
        self.with(name, Arity::Value, Some(1))
    }

    /// An option with a value that may repeat.
    pub(crate) fn repeated(self, name: &str) -> Self {
        self.with(name, Arity::Value, None)
    }

    fn with(mut self, name: &str, arity: Arity, max: Option<usize>) -> Self {
        self.options
            .insert(name.to_ascii_uppercase(), OptionSpec { arity, max });
        self
    }

    pub(crate) fn parse(&self, request: &str) -> Result<ParsedRequest, ServiceResult> {
        let mut tokens = tokenize(request)?.into_iter();
        let mut parsed = ParsedRequest::default();
        while let Some(token) = tokens.next() {
            let name = token.to_ascii_uppercase();
            let spec = self.options.get(&name).ok_or_else(|| {
                invalid(format!("Option, {token}, is not a valid option"))
            })?;
            let value = match spec.arity {
                Arity::Flag => None,
                Arity::Value => Some(tokens.next().ok_or_else(|| {
                    invalid(format!("Option, {name}, requires a value"))
                })?),
            };
            if spec.max.is_some_and(|max| parsed.count(&name) >= max) {
                return Err(invalid(format!(
                    "You may have no more than {} instances of option {name}",
                    spec.max.unwrap_or_default()
                )));
            }
            parsed.entries.push((name, value));
        }
        Ok(parsed)
    }
}

/// Options found in one request, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParsedRequest {
    entries: Vec<(String, Option<String>)>,
}

impl ParsedRequest {
    pub(crate) fn has(&self, name: &str) -> bool {
        self.count(name) > 0
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.entries
            .iter()
            .filter(|(option, _)| option.eq_ignore_ascii_case(name))
            .count()
    }

    /// First value of `name`.
    pub(crate) fn value(&self, name: &str) -> Option<&str> {
        self.values(name).into_iter().next()
    }

    pub(crate) fn values(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(option, _)| option.eq_ignore_ascii_case(name))
            .filter_map(|(_, value)| value.as_deref())
            .collect()
    }

    /// Name of the first option, which selects the command.
    pub(crate) fn command(&self) -> Option<&str> {
        self.entries.first().map(|(name, _)| name.as_str())
    }

    /// Parses a numeric value, reporting `InvalidValue` on failure.
    pub(crate) fn number<T: std::str::FromStr>(
        &self,
        name: &str,
    ) -> Result<Option<T>, ServiceResult> {
        self.value(name)
            .map(|text| {
                text.trim().parse().map_err(|_| {
                    ServiceResult::error(
                        ReturnCode::InvalidValue,
                        format!("Invalid value for option {name}: {text}"),
                    )
                })
            })
            .transpose()
    }

    /// Fails unless at most one of `names` is present.
    pub(crate) fn exclusive(&self, names: &[&str]) -> Result<(), ServiceResult> {
        let present: Vec<&str> = names.iter().copied().filter(|name| self.has(name)).collect();
        if present.len() > 1 {
            return Err(invalid(format!(
                "Options {} are mutually exclusive",
                present.join(", ")
            )));
        }
        Ok(())
    }
}

/// Wraps text as `:len:text` so it survives tokenizing verbatim.
pub(crate) fn wrap_data(text: &str) -> String {
    format!(":{}:{text}", text.chars().count())
}

fn invalid(message: String) -> ServiceResult {
    ServiceResult::error(ReturnCode::InvalidRequestString, message)
}

fn tokenize(request: &str) -> Result<Vec<String>, ServiceResult> {
    let chars: Vec<char> = request.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;
    while index < chars.len() {
        let Some(&current) = chars.get(index) else {
            break;
        };
        if current.is_whitespace() {
            index += 1;
            continue;
        }
        let (token, next) = match current {
            ':' => match length_prefixed(&chars, index) {
                Some(found) => found,
                None => bare_word(&chars, index),
            },
            '"' => quoted(&chars, index)?,
            _ => bare_word(&chars, index),
        };
        tokens.push(token);
        index = next;
    }
    Ok(tokens)
}

fn length_prefixed(chars: &[char], start: usize) -> Option<(String, usize)> {
    let digits_start = start + 1;
    let digits_len = chars
        .get(digits_start..)?
        .iter()
        .take_while(|ch| ch.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return None;
    }
    let colon = digits_start + digits_len;
    if chars.get(colon) != Some(&':') {
        return None;
    }
    let len: usize = chars
        .get(digits_start..colon)?
        .iter()
        .collect::<String>()
        .parse()
        .ok()?;
    let body_start = colon + 1;
    let body = chars.get(body_start..body_start + len)?;
    Some((body.iter().collect(), body_start + len))
}

fn quoted(chars: &[char], start: usize) -> Result<(String, usize), ServiceResult> {
    let mut token = String::new();
    let mut index = start + 1;
    while let Some(&current) = chars.get(index) {
        match current {
            '\\' => {
                if let Some(&escaped) = chars.get(index + 1) {
                    token.push(escaped);
                }
                index += 2;
            }
            '"' => return Ok((token, index + 1)),
            other => {
                token.push(other);
                index += 1;
            }
        }
    }
    Err(invalid("Unterminated quoted string".to_owned()))
}

fn bare_word(chars: &[char], start: usize) -> (String, usize) {
    let rest = chars.get(start..).unwrap_or_default();
    let len = rest.iter().take_while(|ch| !ch.is_whitespace()).count();
    (rest.iter().take(len).collect(), start + len)
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn parser() -> OptionParser {
        OptionParser::new()
            .flag("COPY")
            .value("FILE")
            .value("TOMACHINE")
            .repeated("TEXTEXT")
            .flag("TEXT")
    }

    #[rstest]
    fn parses_flags_and_values(parser: OptionParser) {
        let parsed = parser
            .parse("copy FILE /tmp/a.txt tomachine build01 TEXT")
            .expect("parses");
        assert_eq!(parsed.command(), Some("COPY"));
        assert_eq!(parsed.value("file"), Some("/tmp/a.txt"));
        assert_eq!(parsed.value("TOMACHINE"), Some("build01"));
        assert!(parsed.has("TEXT"));
    }

    #[rstest]
    #[case(":11:hello world", "hello world")]
    #[case("\"hello \\\"world\\\"\"", "hello \"world\"")]
    #[case(":3:a:b", "a:b")]
    fn values_may_be_wrapped(parser: OptionParser, #[case] value: &str, #[case] expected: &str) {
        let parsed = parser
            .parse(&format!("COPY FILE {value}"))
            .expect("parses");
        assert_eq!(parsed.value("FILE"), Some(expected));
    }

    #[rstest]
    fn repeated_options_collect_values(parser: OptionParser) {
        let parsed = parser
            .parse("COPY TEXTEXT txt TEXTEXT c")
            .expect("parses");
        assert_eq!(parsed.values("TEXTEXT"), vec!["txt", "c"]);
    }

    #[rstest]
    #[case("COPY BOGUS")]
    #[case("COPY FILE")]
    #[case("COPY FILE a FILE b")]
    #[case("COPY FILE \"open")]
    fn malformed_requests_are_rejected(parser: OptionParser, #[case] request: &str) {
        let error = parser.parse(request).expect_err("rejected");
        assert_eq!(error.rc, ReturnCode::InvalidRequestString);
    }

    #[rstest]
    fn wrapped_data_round_trips(parser: OptionParser) {
        let text = "{\"rc\": 0}  spaced";
        let parsed = parser
            .parse(&format!("COPY FILE {}", wrap_data(text)))
            .expect("parses");
        assert_eq!(parsed.value("FILE"), Some(text));
    }
}
