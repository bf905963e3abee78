use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of supported providers. All speak the OpenAI-compatible
/// chat-completions dialect; they differ in endpoint, credentials, and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Mistral,
    Groq,
    OpenRouter,
    Together,
}

/// Per-provider sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDefaults {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Mistral,
        ProviderKind::Groq,
        ProviderKind::OpenRouter,
        ProviderKind::Together,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Mistral => "mistral",
            ProviderKind::Groq => "groq",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Together => "together",
        }
    }

    /// Case-insensitive lookup by configuration key.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.id().eq_ignore_ascii_case(key))
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            ProviderKind::Mistral => "https://api.mistral.ai/v1/chat/completions",
            ProviderKind::Groq => "https://api.groq.com/openai/v1/chat/completions",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            ProviderKind::Together => "https://api.together.xyz/v1/chat/completions",
        }
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::Mistral => "MISTRAL_API_KEY",
            ProviderKind::Groq => "GROQ_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            ProviderKind::Together => "TOGETHER_API_KEY",
        }
    }

    pub fn model_env(&self) -> &'static str {
        match self {
            ProviderKind::Mistral => "MISTRAL_MODEL",
            ProviderKind::Groq => "GROQ_MODEL",
            ProviderKind::OpenRouter => "OPENROUTER_MODEL",
            ProviderKind::Together => "TOGETHER_MODEL",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Mistral => "mistral-large-latest",
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::OpenRouter => "meta-llama/llama-3.3-70b-instruct",
            ProviderKind::Together => "meta-llama/Llama-3.3-70B-Instruct-Turbo",
        }
    }

    pub fn sampling(&self) -> SamplingDefaults {
        match self {
            ProviderKind::Mistral => SamplingDefaults {
                temperature: 0.7,
                top_p: 1.0,
                max_tokens: 4096,
            },
            ProviderKind::Groq => SamplingDefaults {
                temperature: 0.6,
                top_p: 0.95,
                max_tokens: 8192,
            },
            ProviderKind::OpenRouter => SamplingDefaults {
                temperature: 0.7,
                top_p: 0.95,
                max_tokens: 4096,
            },
            ProviderKind::Together => SamplingDefaults {
                temperature: 0.7,
                top_p: 0.9,
                max_tokens: 4096,
            },
        }
    }

    /// Comma-separated ids, for error messages.
    pub fn supported_keys() -> String {
        Self::ALL
            .iter()
            .map(|k| k.id())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s).ok_or_else(|| Error::UnsupportedProvider {
            key: s.to_string(),
            supported: Self::supported_keys(),
        })
    }
}

/// Every provider the factory can build.
pub fn list_kinds() -> &'static [ProviderKind] {
    &ProviderKind::ALL
}
