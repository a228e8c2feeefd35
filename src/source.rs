//! Stream link resolution
//!
//! Finding which translations exist for a title and turning a
//! title/episode/translation tuple into a stream link is done by an external
//! service. This module only defines the interface the pipeline calls, plus a
//! fixed-table implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::IdNamespace;

/// Base link of a stream, protocol-relative (`//host/path/`) or absolute
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamLink(String);

impl StreamLink {
    /// Wrap a link as returned by a resolver
    pub fn new(link: impl Into<String>) -> Self {
        Self(link.into())
    }

    /// Raw link
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Link with a scheme; protocol-relative links get `https:`
    pub fn absolute(&self) -> String {
        if self.0.starts_with("http://") || self.0.starts_with("https://") {
            self.0.clone()
        } else if self.0.starts_with("//") {
            format!("https:{}", self.0)
        } else {
            format!("https://{}", self.0)
        }
    }
}

impl fmt::Display for StreamLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a translation is a voice-over or subtitles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationKind {
    /// Voice-over / dub
    Dub,
    /// Subtitles
    Sub,
    /// Not reported by the source
    Unknown,
}

/// One translation offered for a title
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationInfo {
    /// Translation id, passed back to [`LinkResolver::resolve`]
    pub id: String,
    /// Dub or subtitles
    pub kind: TranslationKind,
    /// Display name
    pub name: String,
}

impl TranslationInfo {
    /// Create a translation entry
    pub fn new(id: impl Into<String>, kind: TranslationKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
        }
    }
}

/// Trait for the external service that locates streams
///
/// # Errors
///
/// Implementations return [`Error::Resolve`] when a title, episode or
/// translation is unknown to them.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Base stream link for one episode in one translation
    async fn resolve(
        &self,
        identifier: &str,
        namespace: IdNamespace,
        episode: u32,
        translation_id: &str,
    ) -> Result<StreamLink>;

    /// Translations available for a title, in the source's order
    async fn available_translations(
        &self,
        identifier: &str,
        namespace: IdNamespace,
    ) -> Result<Vec<TranslationInfo>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

type LinkKey = (String, IdNamespace, u32, String);
type TitleKey = (String, IdNamespace);

/// [`LinkResolver`] backed by fixed tables
#[derive(Clone, Debug, Default)]
pub struct StaticLinkResolver {
    links: HashMap<LinkKey, StreamLink>,
    translations: HashMap<TitleKey, Vec<TranslationInfo>>,
}

impl StaticLinkResolver {
    /// Empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the link for one episode/translation
    pub fn with_link(
        mut self,
        identifier: &str,
        namespace: IdNamespace,
        episode: u32,
        translation_id: &str,
        link: StreamLink,
    ) -> Self {
        self.links.insert(
            (
                identifier.to_string(),
                namespace,
                episode,
                translation_id.to_string(),
            ),
            link,
        );
        self
    }

    /// Register the translation list for a title
    pub fn with_translations(
        mut self,
        identifier: &str,
        namespace: IdNamespace,
        translations: Vec<TranslationInfo>,
    ) -> Self {
        self.translations
            .insert((identifier.to_string(), namespace), translations);
        self
    }
}

#[async_trait]
impl LinkResolver for StaticLinkResolver {
    async fn resolve(
        &self,
        identifier: &str,
        namespace: IdNamespace,
        episode: u32,
        translation_id: &str,
    ) -> Result<StreamLink> {
        let key = (
            identifier.to_string(),
            namespace,
            episode,
            translation_id.to_string(),
        );
        self.links.get(&key).cloned().ok_or_else(|| {
            Error::Resolve(format!(
                "no link for {namespace}:{identifier} episode {episode} translation {translation_id}"
            ))
        })
    }

    async fn available_translations(
        &self,
        identifier: &str,
        namespace: IdNamespace,
    ) -> Result<Vec<TranslationInfo>> {
        self.translations
            .get(&(identifier.to_string(), namespace))
            .cloned()
            .ok_or_else(|| Error::Resolve(format!("unknown title {namespace}:{identifier}")))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
