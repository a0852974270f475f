//! Rule pattern matching.
//!
//! A matcher decides whether a rule applies to a candidate target and, if so,
//! produces the ordered list of source paths the rule depends on. Three
//! variants exist (exact text, `%` wildcard, full regular expression), and
//! the first two are compiled down to the regex form at construction.

use regex::Regex;
use thiserror::Error;

/// Errors raised while declaring a matcher.
///
/// These are programming errors in rule declaration and are surfaced
/// immediately at construction, never deferred to match time.
#[derive(Debug, Error)]
pub enum MatcherError {
  /// The target pattern is not a valid regular expression.
  #[error("invalid target pattern '{pattern}': {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: regex::Error,
  },

  /// A source template references a capture group the pattern does not have.
  #[error("source template '{template}' refers to group {index}, but pattern '{pattern}' has {groups} group(s)")]
  GroupOutOfRange {
    template: String,
    pattern: String,
    index: usize,
    groups: usize,
  },

  /// A source template contains an unbalanced or malformed placeholder.
  #[error("malformed placeholder in source template '{0}'")]
  MalformedTemplate(String),
}

/// The concrete result of matching a target against a rule's pattern.
///
/// Source order is significant: it is preserved exactly as declared, since it
/// may encode compiler or linker argument order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
  pub target: String,
  pub sources: Vec<String>,
}

/// One piece of a parsed source template.
#[derive(Debug, Clone)]
enum Piece {
  Literal(String),
  /// Zero-based index into the pattern's capture groups.
  Group(usize),
}

/// A source template compiled into literal and capture-group pieces.
#[derive(Debug, Clone)]
struct Template {
  pieces: Vec<Piece>,
}

impl Template {
  /// Parse a template string. `{N}` substitutes capture group N, `{{` and
  /// `}}` are literal braces; anything else brace-shaped is malformed.
  fn parse(template: &str) -> Result<Self, MatcherError> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
      match c {
        '{' => {
          if chars.peek() == Some(&'{') {
            chars.next();
            literal.push('{');
            continue;
          }

          let mut digits = String::new();
          while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            digits.push(*d);
            chars.next();
          }

          if digits.is_empty() || chars.next() != Some('}') {
            return Err(MatcherError::MalformedTemplate(template.to_string()));
          }

          if !literal.is_empty() {
            pieces.push(Piece::Literal(std::mem::take(&mut literal)));
          }
          let index = digits
            .parse()
            .map_err(|_| MatcherError::MalformedTemplate(template.to_string()))?;
          pieces.push(Piece::Group(index));
        }
        '}' => {
          if chars.next() == Some('}') {
            literal.push('}');
          } else {
            return Err(MatcherError::MalformedTemplate(template.to_string()));
          }
        }
        c => literal.push(c),
      }
    }

    if !literal.is_empty() {
      pieces.push(Piece::Literal(literal));
    }

    Ok(Template { pieces })
  }

  /// The highest group index referenced, if any group is referenced at all.
  fn max_group(&self) -> Option<usize> {
    self
      .pieces
      .iter()
      .filter_map(|p| match p {
        Piece::Group(i) => Some(*i),
        Piece::Literal(_) => None,
      })
      .max()
  }

  /// Substitute captured groups into the template.
  fn expand(&self, captures: &regex::Captures<'_>) -> String {
    let mut out = String::new();
    for piece in &self.pieces {
      match piece {
        Piece::Literal(s) => out.push_str(s),
        // Group 0 in a template is the pattern's first capture group.
        Piece::Group(i) => {
          if let Some(m) = captures.get(i + 1) {
            out.push_str(m.as_str());
          }
        }
      }
    }
    out
  }
}

/// Escape `{` and `}` so literal text survives template parsing untouched.
fn escape_template(text: &str) -> String {
  text.replace('{', "{{").replace('}', "}}")
}

/// A compiled rule pattern: an anchored regex over the target plus one
/// compiled source template per declared source.
///
/// Matching is pure and deterministic: the same target always yields the
/// same [`Binding`].
#[derive(Debug, Clone)]
pub struct Matcher {
  pattern: String,
  regex: Regex,
  sources: Vec<Template>,
}

impl Matcher {
  /// Exact-text matcher: the target and every source are literal strings.
  pub fn text(target: &str, sources: &[&str]) -> Result<Self, MatcherError> {
    let escaped: Vec<String> = sources.iter().map(|s| escape_template(s)).collect();
    Self::compile(&regex::escape(target), &escaped)
  }

  /// `%` wildcard matcher: the first `%` in the target captures a segment,
  /// and every `%` in a source substitutes that same segment.
  pub fn percent(target: &str, sources: &[&str]) -> Result<Self, MatcherError> {
    let mut pattern = String::new();
    for (i, part) in regex::escape(target).split('%').enumerate() {
      if i > 0 {
        // Only the first % captures; the regex engine has no backreferences,
        // so later occurrences match independently without capturing.
        pattern.push_str(if i == 1 { "(.*?)" } else { "(?:.*?)" });
      }
      pattern.push_str(part);
    }

    let templated: Vec<String> = sources
      .iter()
      .map(|s| escape_template(s).replace('%', "{0}"))
      .collect();
    Self::compile(&pattern, &templated)
  }

  /// Full regular-expression matcher: sources are templates with `{0}`,
  /// `{1}`, … referring to the pattern's capture groups in order.
  pub fn regex(target: &str, sources: &[&str]) -> Result<Self, MatcherError> {
    let owned: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
    Self::compile(target, &owned)
  }

  fn compile(pattern: &str, sources: &[String]) -> Result<Self, MatcherError> {
    let regex = Regex::new(&format!(r"\A(?:{})\z", pattern)).map_err(|source| MatcherError::Pattern {
      pattern: pattern.to_string(),
      source,
    })?;

    // captures_len counts the implicit whole-match group 0.
    let groups = regex.captures_len() - 1;

    let mut templates = Vec::with_capacity(sources.len());
    for source in sources {
      let template = Template::parse(source)?;
      if let Some(max) = template.max_group()
        && max >= groups
      {
        return Err(MatcherError::GroupOutOfRange {
          template: source.clone(),
          pattern: pattern.to_string(),
          index: max,
          groups,
        });
      }
      templates.push(template);
    }

    Ok(Matcher {
      pattern: pattern.to_string(),
      regex,
      sources: templates,
    })
  }

  /// The anchored pattern this matcher compiles to.
  pub fn pattern(&self) -> &str {
    &self.pattern
  }

  /// Match a target against this pattern.
  ///
  /// Returns the binding with every source template expanded, or `None` if
  /// the pattern does not match the whole target string.
  pub fn match_target(&self, target: &str) -> Option<Binding> {
    let captures = self.regex.captures(target)?;
    let sources = self.sources.iter().map(|t| t.expand(&captures)).collect();
    Some(Binding {
      target: target.to_string(),
      sources,
    })
  }
}
