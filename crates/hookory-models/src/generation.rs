//! Generation request vocabulary: output formats, input types and context.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default audience when the caller leaves it blank.
pub const DEFAULT_TARGET_AUDIENCE: &str = "General LinkedIn users";

/// Output post format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    MainPost,
    StoryBased,
    Carousel,
    ShortViralHook,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::MainPost,
        OutputFormat::StoryBased,
        OutputFormat::Carousel,
        OutputFormat::ShortViralHook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::MainPost => "main-post",
            OutputFormat::StoryBased => "story-based",
            OutputFormat::Carousel => "carousel",
            OutputFormat::ShortViralHook => "short-viral-hook",
        }
    }

    /// Writing instruction for the generation backend.
    pub fn instructions(&self) -> &'static str {
        match self {
            OutputFormat::MainPost => {
                "Write one complete LinkedIn post with a strong opening hook, short paragraphs and a closing call to action."
            }
            OutputFormat::StoryBased => {
                "Write a LinkedIn post told as a personal story: situation, tension, turning point and lesson."
            }
            OutputFormat::Carousel => {
                "Write LinkedIn carousel copy as numbered slides. Slide 1 is the hook, the last slide is the call to action. Keep each slide under 30 words."
            }
            OutputFormat::ShortViralHook => {
                "Write five alternative one-line opening hooks, each on its own line."
            }
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the source text comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Text,
    Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Goal {
    Engagement,
    Leads,
    Authority,
}

impl Goal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Goal::Engagement => "engagement",
            Goal::Leads => "leads",
            Goal::Authority => "authority",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum PostStyle {
    ThoughtLeader,
    Storyteller,
    Educator,
}

impl PostStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStyle::ThoughtLeader => "thought-leader",
            PostStyle::Storyteller => "storyteller",
            PostStyle::Educator => "educator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TonePreset {
    #[default]
    Professional,
    Conversational,
    Storytelling,
    Educational,
    Bold,
}

impl TonePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            TonePreset::Professional => "professional",
            TonePreset::Conversational => "conversational",
            TonePreset::Storytelling => "storytelling",
            TonePreset::Educational => "educational",
            TonePreset::Bold => "bold",
        }
    }
}

/// Caller-supplied context. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationContext {
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub goal: Option<Goal>,
    #[serde(default)]
    pub style: Option<PostStyle>,
    #[serde(default)]
    pub emoji_on: bool,
    #[serde(default)]
    pub tone_preset: Option<TonePreset>,
}

impl GenerationContext {
    /// Fill defaults for absent fields.
    pub fn resolve(&self) -> ResolvedContext {
        let target_audience = self
            .target_audience
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TARGET_AUDIENCE)
            .to_string();

        ResolvedContext {
            target_audience,
            goal: self.goal,
            style: self.style,
            emoji_on: self.emoji_on,
            tone_preset: self.tone_preset.unwrap_or_default(),
        }
    }
}

/// Context with defaults applied. This is what the cache key hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedContext {
    pub target_audience: String,
    pub goal: Option<Goal>,
    pub style: Option<PostStyle>,
    pub emoji_on: bool,
    pub tone_preset: TonePreset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_wire_names() {
        let formats: Vec<OutputFormat> =
            serde_json::from_str(r#"["main-post","story-based","carousel","short-viral-hook"]"#)
                .unwrap();
        assert_eq!(formats, OutputFormat::ALL.to_vec());
    }

    #[test]
    fn test_context_defaults() {
        let ctx: GenerationContext = serde_json::from_str("{}").unwrap();
        let resolved = ctx.resolve();
        assert_eq!(resolved.target_audience, DEFAULT_TARGET_AUDIENCE);
        assert_eq!(resolved.tone_preset, TonePreset::Professional);
        assert!(!resolved.emoji_on);
    }

    #[test]
    fn test_blank_audience_uses_default() {
        let ctx = GenerationContext {
            target_audience: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(ctx.resolve().target_audience, DEFAULT_TARGET_AUDIENCE);
    }
}
