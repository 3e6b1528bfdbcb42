//! Layout patterns
//!
//! A pattern is a repository-relative path template with bracketed
//! placeholders and optional parenthesised groups:
//!
//! ```text
//! [organisation]/[module]/[revision]/[artifact]-[revision](-[classifier]).[ext]
//! ```
//!
//! Placeholders: `[organisation]` (also `[organization]`, `[org]`),
//! `[module]`, `[revision]`, `[artifact]`, `[classifier]`, `[ext]`, `[type]`.
//! A `( ... )` group is emitted only when every placeholder inside it has a
//! value, which is how an absent classifier disappears without leaving a
//! stray `-` behind.
//!
//! Patterns are parsed once, when a resolver is built; an unknown
//! placeholder is a [`ConfigError`] there, never a resolution-time failure.

use std::borrow::Cow;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::identity::ArtifactIdentity;

/// Maven-style artifact location.
pub const HIERARCHICAL_ARTIFACT_PATTERN: &str =
    "[organisation]/[module]/[revision]/[artifact]-[revision](-[classifier]).[ext]";

/// Maven-style module descriptor location.
pub const HIERARCHICAL_METADATA_PATTERN: &str =
    "[organisation]/[module]/[revision]/[module]-[revision].pom";

/// Ivy-style artifact location.
pub const FLAT_ARTIFACT_PATTERN: &str =
    "[organisation]/[module]/[revision]/[type]s/[artifact](-[classifier]).[ext]";

/// Ivy-style module descriptor location.
pub const FLAT_METADATA_PATTERN: &str = "[organisation]/[module]/[revision]/ivys/ivy.xml";

/// Repository layout convention, applied uniformly to every pattern of a
/// resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One directory per group segment: `org.acme` becomes `org/acme`.
    #[default]
    Hierarchical,
    /// Group used verbatim as a single path segment.
    Flat,
}

impl Layout {
    /// Default `(metadata, artifact)` patterns for this layout.
    pub fn default_patterns(&self) -> (&'static str, &'static str) {
        match self {
            Self::Hierarchical => (HIERARCHICAL_METADATA_PATTERN, HIERARCHICAL_ARTIFACT_PATTERN),
            Self::Flat => (FLAT_METADATA_PATTERN, FLAT_ARTIFACT_PATTERN),
        }
    }

    /// Extension of this layout's module descriptor, substituted for
    /// `[ext]` in metadata patterns.
    pub fn metadata_extension(&self) -> &'static str {
        match self {
            Self::Hierarchical => "pom",
            Self::Flat => "xml",
        }
    }

    fn organisation<'a>(&self, group: &'a str) -> Cow<'a, str> {
        match self {
            Self::Hierarchical => Cow::Owned(group.replace('.', "/")),
            Self::Flat => Cow::Borrowed(group),
        }
    }

    fn substitute<'a>(&self, token: Token, id: &'a ArtifactIdentity) -> Option<Cow<'a, str>> {
        match token {
            Token::Organisation => Some(self.organisation(id.group())),
            Token::Module => Some(Cow::Borrowed(id.module())),
            Token::Revision => Some(Cow::Borrowed(id.version())),
            Token::Artifact => Some(Cow::Borrowed(id.name())),
            Token::Classifier => id.classifier().map(Cow::Borrowed),
            Token::Ext | Token::Type => Some(Cow::Borrowed(id.extension())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Organisation,
    Module,
    Revision,
    Artifact,
    Classifier,
    Ext,
    Type,
}

impl Token {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "organisation" | "organization" | "org" => Self::Organisation,
            "module" => Self::Module,
            "revision" => Self::Revision,
            "artifact" => Self::Artifact,
            "classifier" => Self::Classifier,
            "ext" => Self::Ext,
            "type" => Self::Type,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Token),
    /// Only contains `Literal` and `Token`.
    Optional(Vec<Segment>),
}

/// A parsed, validated path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPattern {
    source: String,
    layout: Layout,
    segments: Vec<Segment>,
}

impl LayoutPattern {
    pub fn new(pattern: &str, layout: Layout) -> Result<Self, ConfigError> {
        Ok(Self {
            source: pattern.to_string(),
            layout,
            segments: parse(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Substitute `id` into the pattern. Pure; no I/O.
    pub fn resolve(&self, id: &ArtifactIdentity) -> String {
        let mut path = String::with_capacity(self.source.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => path.push_str(text),
                Segment::Token(token) => {
                    if let Some(value) = self.layout.substitute(*token, id) {
                        path.push_str(&value);
                    }
                }
                Segment::Optional(inner) => {
                    if let Some(group) = self.render_optional(inner, id) {
                        path.push_str(&group);
                    }
                }
            }
        }
        path
    }

    fn render_optional(&self, inner: &[Segment], id: &ArtifactIdentity) -> Option<String> {
        let mut out = String::new();
        for segment in inner {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(token) => out.push_str(&self.layout.substitute(*token, id)?),
                Segment::Optional(_) => return None,
            }
        }
        Some(out)
    }
}

fn parse(pattern: &str) -> Result<Vec<Segment>, ConfigError> {
    let malformed = |reason| ConfigError::MalformedPattern {
        pattern: pattern.to_string(),
        reason,
    };

    let mut segments = Vec::new();
    let mut optional: Option<Vec<Segment>> = None;
    let mut literal = String::new();
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        let current = optional.as_mut().unwrap_or(&mut segments);
        match c {
            '[' => {
                flush(&mut literal, current);
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some('[') | None => return Err(malformed("unterminated placeholder")),
                        Some(c) => name.push(c),
                    }
                }
                let token = Token::from_name(&name).ok_or_else(|| ConfigError::UnknownToken {
                    pattern: pattern.to_string(),
                    token: name.clone(),
                })?;
                current.push(Segment::Token(token));
            }
            ']' => return Err(malformed("unmatched ']'")),
            '(' => {
                flush(&mut literal, current);
                if optional.is_some() {
                    return Err(malformed("nested optional group"));
                }
                optional = Some(Vec::new());
            }
            ')' => {
                let mut inner = optional.take().ok_or_else(|| malformed("unmatched ')'"))?;
                flush(&mut literal, &mut inner);
                segments.push(Segment::Optional(inner));
            }
            c => literal.push(c),
        }
    }

    if optional.is_some() {
        return Err(malformed("unterminated optional group"));
    }
    flush(&mut literal, &mut segments);

    if segments.is_empty() {
        return Err(malformed("empty pattern"));
    }
    Ok(segments)
}

fn flush(literal: &mut String, into: &mut Vec<Segment>) {
    if !literal.is_empty() {
        into.push(Segment::Literal(std::mem::take(literal)));
    }
}
