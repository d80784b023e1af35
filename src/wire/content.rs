//! User and tool content: either a bare string or a list of typed parts.
//!
//! On the wire a [`Content`] is a JSON string or a JSON array. The decoder
//! picks the representation from the leading token (`"` or `[`) rather than
//! by probing fields, so a malformed array is reported as a malformed array
//! instead of silently falling back to another shape.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Which representation a [`Content`] value carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// A single plain string.
    Text,
    /// An ordered list of [`ContentPart`]s.
    Parts,
}

/// Prompt input or tool output.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Plain text, encoded as a bare JSON string.
    Text(String),
    /// Typed parts, encoded as a JSON array.
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Build plain-text content.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Build content from a list of parts.
    #[must_use]
    pub fn parts(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }

    /// Representation tag, always consistent with the populated variant.
    #[must_use]
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Text(_) => ContentKind::Text,
            Self::Parts(_) => ContentKind::Parts,
        }
    }

    /// Concatenate every textual fragment (plain text and `text` parts).
    ///
    /// Reasoning (`think`) parts and media references are skipped.
    #[must_use]
    pub fn extract_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ContentPart>> for Content {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

impl Serialize for Content {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Parts(parts) => parts.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Content {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ContentVisitor)
    }
}

struct ContentVisitor;

impl<'de> Visitor<'de> for ContentVisitor {
    type Value = Content;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or an array of content parts")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Content, E> {
        Ok(Content::Text(value.to_owned()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> std::result::Result<Content, E> {
        Ok(Content::Text(value))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Content, A::Error> {
        let mut parts = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(part) = seq.next_element::<ContentPart>()? {
            parts.push(part);
        }
        Ok(Content::Parts(parts))
    }
}

/// One typed fragment of content, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Visible text.
    Text {
        /// Text fragment.
        text: String,
    },
    /// Model reasoning.
    Think {
        /// Reasoning fragment.
        think: String,
        /// Opaque encrypted reasoning blob, when the provider returns one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted: Option<String>,
    },
    /// Image reference.
    ImageUrl {
        /// Location of the image.
        image_url: MediaUrl,
    },
    /// Audio reference.
    AudioUrl {
        /// Location of the audio clip.
        audio_url: MediaUrl,
    },
}

impl ContentPart {
    /// Build a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Build a reasoning part.
    #[must_use]
    pub fn think(think: impl Into<String>) -> Self {
        Self::Think {
            think: think.into(),
            encrypted: None,
        }
    }

    /// Append `other` to this part in place when both are of the same
    /// textual kind. Returns `false` when the parts cannot be merged.
    pub fn merge(&mut self, other: &ContentPart) -> bool {
        match (self, other) {
            (Self::Text { text }, Self::Text { text: more }) => {
                text.push_str(more);
                true
            }
            (
                Self::Think {
                    think,
                    encrypted: mine @ None,
                },
                Self::Think {
                    think: more,
                    encrypted,
                },
            ) => {
                think.push_str(more);
                mine.clone_from(encrypted);
                true
            }
            _ => false,
        }
    }
}

/// URL of a media attachment with an optional provider-side id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUrl {
    /// Provider-side identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Fetchable URL or data URI.
    pub url: String,
}
