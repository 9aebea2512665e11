//! Label matchers and series selector parsing.

use super::labels::METRIC_NAME_LABEL;
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Matcher operator. Discriminants are the wire values.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, prost::Enumeration,
)]
#[repr(i32)]
pub enum MatchType {
    Equal = 0,
    NotEqual = 1,
    RegexMatch = 2,
    RegexNoMatch = 3,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::RegexMatch => "=~",
            MatchType::RegexNoMatch => "!~",
        }
    }
}

/// A compiled label matcher.
#[derive(Clone)]
pub struct Matcher {
    pub match_type: MatchType,
    pub name: String,
    pub value: String,
    regex: Option<Regex>,
}

impl Matcher {
    /// Build a matcher, compiling (fully anchored) regexes up front so a bad
    /// pattern is rejected before any replica is contacted.
    pub fn new(match_type: MatchType, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        let regex = match match_type {
            MatchType::RegexMatch | MatchType::RegexNoMatch => {
                Some(Regex::new(&format!("^(?:{})$", value)).map_err(|e| {
                    Error::InvalidRequest(format!("invalid regex for label {}: {}", name, e))
                })?)
            }
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self {
            match_type,
            name,
            value,
            regex,
        })
    }

    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            match_type: MatchType::Equal,
            name: name.into(),
            value: value.into(),
            regex: None,
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match (self.match_type, &self.regex) {
            (MatchType::Equal, _) => self.value == value,
            (MatchType::NotEqual, _) => self.value != value,
            (MatchType::RegexMatch, Some(re)) => re.is_match(value),
            (MatchType::RegexNoMatch, Some(re)) => !re.is_match(value),
            (_, None) => false,
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.match_type == other.match_type && self.name == other.name && self.value == other.value
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type.as_str(), self.value)
    }
}

/// Find the matcher on the metric name label, returning it together with
/// the remaining matchers.
pub fn metric_name_matcher(matchers: &[Matcher]) -> Option<(&Matcher, Vec<&Matcher>)> {
    let idx = matchers.iter().position(|m| m.name == METRIC_NAME_LABEL)?;
    let rest = matchers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != idx)
        .map(|(_, m)| m)
        .collect();
    Some((&matchers[idx], rest))
}

/// Parse a series selector such as `up{job="api", instance=~"10\\..*"}`.
pub fn parse_selector(input: &str) -> Result<Vec<Matcher>> {
    let mut parser = SelectorParser {
        src: input.trim(),
        pos: 0,
    };
    let matchers = parser.parse()?;
    if !matchers.iter().any(|m| !m.matches("")) {
        return Err(Error::InvalidRequest(format!(
            "selector {:?} must contain at least one matcher that does not match the empty string",
            input
        )));
    }
    Ok(matchers)
}

struct SelectorParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> SelectorParser<'a> {
    fn parse(&mut self) -> Result<Vec<Matcher>> {
        let mut matchers = Vec::new();

        if self.peek().map(is_name_start).unwrap_or(false) {
            let name = self.identifier();
            matchers.push(Matcher::equal(METRIC_NAME_LABEL, name));
        }

        self.skip_whitespace();
        if self.peek() == Some('{') {
            self.bump();
            loop {
                self.skip_whitespace();
                match self.peek() {
                    Some('}') => {
                        self.bump();
                        break;
                    }
                    Some(c) if is_name_start(c) => {
                        matchers.push(self.matcher()?);
                        self.skip_whitespace();
                        match self.peek() {
                            Some(',') => self.bump(),
                            Some('}') => {}
                            other => return Err(self.unexpected(other, "',' or '}'")),
                        }
                    }
                    other => return Err(self.unexpected(other, "label name or '}'")),
                }
            }
        }

        self.skip_whitespace();
        if self.pos != self.src.len() {
            return Err(self.unexpected(self.peek(), "end of selector"));
        }
        if matchers.is_empty() {
            return Err(Error::InvalidRequest("empty selector".to_string()));
        }
        Ok(matchers)
    }

    fn matcher(&mut self) -> Result<Matcher> {
        let name = self.identifier();
        self.skip_whitespace();
        let rest = &self.src[self.pos..];
        let (match_type, len) = if rest.starts_with("=~") {
            (MatchType::RegexMatch, 2)
        } else if rest.starts_with("!~") {
            (MatchType::RegexNoMatch, 2)
        } else if rest.starts_with("!=") {
            (MatchType::NotEqual, 2)
        } else if rest.starts_with('=') {
            (MatchType::Equal, 1)
        } else {
            return Err(self.unexpected(self.peek(), "matcher operator"));
        };
        self.pos += len;
        self.skip_whitespace();
        let value = self.quoted()?;
        Matcher::new(match_type, name, value)
    }

    fn quoted(&mut self) -> Result<String> {
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            other => return Err(self.unexpected(other, "quoted string")),
        };
        self.bump();
        let mut out = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(Error::InvalidRequest(
                        "unterminated string in selector".to_string(),
                    ))
                }
                Some(c) if c == quote => {
                    self.bump();
                    return Ok(out);
                }
                Some('\\') => {
                    self.bump();
                    let escaped = match self.peek() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some(c) => c,
                        None => continue,
                    };
                    out.push(escaped);
                    self.bump();
                }
                Some(c) => {
                    out.push(c);
                    self.bump();
                }
            }
        }
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                self.bump();
            } else {
                break;
            }
        }
        &self.src[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.bump();
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn unexpected(&self, found: Option<char>, expected: &str) -> Error {
        Error::InvalidRequest(match found {
            Some(c) => format!(
                "unexpected {:?} at position {} in selector, expected {}",
                c, self.pos, expected
            ),
            None => format!("unexpected end of selector, expected {}", expected),
        })
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}
