//! Node patterns for streamed JSON, in the spirit of oboe's JSONPath subset.
//!
//! ```text
//! !                 every top-level value
//! items.*           any child of an `items` field, at any depth
//! !.items[*]        children of the root's `items` field
//! !..progressDetail a `progressDetail` field anywhere below the root
//! {status id}       any object carrying both `status` and `id`
//! ```

use std::{fmt, str::FromStr};

use serde_json::Value;
use thiserror::Error;

use crate::json_stream::PathSegment;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,
    #[error("pattern `{pattern}`: {reason}")]
    Invalid { pattern: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Field(String),
    Index(usize),
    Any,
    Descendants,
}

impl Step {
    fn accepts(&self, segment: &PathSegment) -> bool {
        match (self, segment) {
            (Self::Any, _) => true,
            (Self::Field(name), PathSegment::Key(key)) => name == key,
            (Self::Index(index), PathSegment::Index(position)) => index == position,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    anchored: bool,
    steps: Vec<Step>,
    required_fields: Vec<String>,
}

impl Pattern {
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        let text = source.trim();
        if text.is_empty() {
            return Err(PatternError::Empty);
        }
        let invalid = |reason: &str| PatternError::Invalid {
            pattern: text.to_string(),
            reason: reason.to_string(),
        };

        let (anchored, rest) = match text.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let (path, required_fields) = match rest.find('{') {
            Some(open) => {
                let filter = &rest[open..];
                let Some(inner) = filter
                    .strip_prefix('{')
                    .and_then(|filter| filter.strip_suffix('}'))
                else {
                    return Err(invalid("field filter must be the last step and end with `}`"));
                };
                let fields: Vec<String> = inner
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|field| !field.is_empty())
                    .map(str::to_string)
                    .collect();
                if fields.is_empty() || fields.iter().any(|field| field.contains(['{', '}'])) {
                    return Err(invalid("field filter needs at least one field name"));
                }
                (&rest[..open], fields)
            }
            None => (rest, Vec::new()),
        };

        let steps = parse_steps(path).map_err(|reason| invalid(&reason))?;
        Ok(Self {
            source: text.to_string(),
            anchored,
            steps,
            required_fields,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the node at `path` with content `value` is selected.
    pub fn matches(&self, path: &[PathSegment], value: &Value) -> bool {
        if !self.required_fields.is_empty() {
            let Value::Object(fields) = value else {
                return false;
            };
            if !self
                .required_fields
                .iter()
                .all(|field| fields.contains_key(field))
            {
                return false;
            }
        }
        if self.anchored {
            match_steps(&self.steps, path)
        } else {
            (0..=path.len()).any(|start| match_steps(&self.steps, &path[start..]))
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Self::parse(source)
    }
}

/// Parses every pattern, keeping declaration order.
pub fn parse_all<I, S>(sources: I) -> Result<Vec<Pattern>, PatternError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    sources
        .into_iter()
        .map(|source| Pattern::parse(source.as_ref()))
        .collect()
}

fn match_steps(steps: &[Step], path: &[PathSegment]) -> bool {
    match steps.split_first() {
        None => path.is_empty(),
        Some((Step::Descendants, rest)) => {
            (0..=path.len()).any(|skip| match_steps(rest, &path[skip..]))
        }
        Some((step, rest)) => match path.split_first() {
            Some((segment, tail)) if step.accepts(segment) => match_steps(rest, tail),
            _ => false,
        },
    }
}

fn parse_steps(mut rest: &str) -> Result<Vec<Step>, String> {
    let mut steps = Vec::new();
    let mut expect_name = true;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("..") {
            steps.push(Step::Descendants);
            rest = after;
            expect_name = true;
        } else if let Some(after) = rest.strip_prefix('.') {
            if after.is_empty() || after.starts_with(['.', '[']) {
                return Err("`.` must be followed by a field name or `*`".into());
            }
            rest = after;
            expect_name = true;
        } else if let Some(after) = rest.strip_prefix('[') {
            let Some(close) = after.find(']') else {
                return Err("unclosed `[`".into());
            };
            steps.push(parse_bracket(after[..close].trim())?);
            rest = &after[close + 1..];
            expect_name = false;
        } else if expect_name {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            let name = &rest[..end];
            steps.push(if name == "*" {
                Step::Any
            } else {
                Step::Field(name.to_string())
            });
            rest = &rest[end..];
            expect_name = false;
        } else {
            return Err(format!("unexpected `{rest}`"));
        }
    }
    Ok(steps)
}

fn parse_bracket(inner: &str) -> Result<Step, String> {
    if inner == "*" {
        return Ok(Step::Any);
    }
    if let Ok(index) = inner.parse::<usize>() {
        return Ok(Step::Index(index));
    }
    for quote in ['"', '\''] {
        if let Some(name) = inner
            .strip_prefix(quote)
            .and_then(|inner| inner.strip_suffix(quote))
        {
            return Ok(Step::Field(name.to_string()));
        }
    }
    Err(format!("`[{inner}]` is neither an index, `*` nor a quoted field"))
}
