// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Static capability taxonomy.

use serde::{Deserialize, Serialize};

/// One entry of the capability taxonomy.
#[derive(Debug, Clone, Copy)]
pub struct CapabilitySpec {
    pub name: &'static str,
    pub display_name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    /// Lowercase keywords matched against model names and descriptions
    pub keywords: &'static [&'static str],
    /// Strength assigned on a plain keyword match (1..=5)
    pub base_strength: i32,
}

/// Known capabilities, grouped by category.
pub const TAXONOMY: &[CapabilitySpec] = &[
    CapabilitySpec {
        name: "text_generation",
        display_name: "Text Generation",
        category: "language",
        description: "General purpose text generation",
        keywords: &["gpt", "llama", "qwen", "mistral", "deepseek", "claude", "gemma", "chat", "instruct", "text"],
        base_strength: 3,
    },
    CapabilitySpec {
        name: "chat",
        display_name: "Conversation",
        category: "language",
        description: "Multi-turn dialogue",
        keywords: &["chat", "instruct", "assistant", "turbo", "conversation"],
        base_strength: 3,
    },
    CapabilitySpec {
        name: "code_generation",
        display_name: "Code Generation",
        category: "code",
        description: "Writing and editing source code",
        keywords: &["code", "coder", "codex", "starcoder", "codellama", "programming", "devstral"],
        base_strength: 4,
    },
    CapabilitySpec {
        name: "image_generation",
        display_name: "Image Generation",
        category: "vision",
        description: "Creating images from text prompts",
        keywords: &["dall-e", "dalle", "stable-diffusion", "sdxl", "flux", "midjourney", "image generation", "text-to-image"],
        base_strength: 4,
    },
    CapabilitySpec {
        name: "image_understanding",
        display_name: "Image Understanding",
        category: "vision",
        description: "Describing and reasoning about images",
        keywords: &["vision", "vl", "llava", "multimodal", "gpt-4o", "image understanding"],
        base_strength: 3,
    },
    CapabilitySpec {
        name: "knowledge_retrieval",
        display_name: "Knowledge Retrieval",
        category: "knowledge",
        description: "Answering from retrieved documents",
        keywords: &["rag", "retrieval", "search", "knowledge", "long context", "128k"],
        base_strength: 3,
    },
    CapabilitySpec {
        name: "reasoning",
        display_name: "Reasoning",
        category: "reasoning",
        description: "Multi-step logical reasoning",
        keywords: &["reason", "reasoner", "o1", "o3", "r1", "think", "thinking"],
        base_strength: 4,
    },
    CapabilitySpec {
        name: "mathematics",
        display_name: "Mathematics",
        category: "reasoning",
        description: "Mathematical problem solving",
        keywords: &["math", "mathstral", "qwen2-math", "numina"],
        base_strength: 4,
    },
    CapabilitySpec {
        name: "translation",
        display_name: "Translation",
        category: "language",
        description: "Translating between languages",
        keywords: &["translate", "translation", "multilingual", "nllb", "m2m"],
        base_strength: 3,
    },
    CapabilitySpec {
        name: "summarization",
        display_name: "Summarization",
        category: "language",
        description: "Condensing long text",
        keywords: &["summarize", "summarization", "summary", "long context"],
        base_strength: 3,
    },
    CapabilitySpec {
        name: "embedding",
        display_name: "Embedding",
        category: "knowledge",
        description: "Vector embeddings for search",
        keywords: &["embed", "embedding", "bge", "e5", "nomic"],
        base_strength: 4,
    },
    CapabilitySpec {
        name: "speech_recognition",
        display_name: "Speech Recognition",
        category: "audio",
        description: "Transcribing speech to text",
        keywords: &["whisper", "asr", "speech-to-text", "transcribe", "transcription"],
        base_strength: 4,
    },
    CapabilitySpec {
        name: "speech_synthesis",
        display_name: "Speech Synthesis",
        category: "audio",
        description: "Generating speech from text",
        keywords: &["tts", "text-to-speech", "voice", "speech synthesis"],
        base_strength: 4,
    },
    CapabilitySpec {
        name: "function_calling",
        display_name: "Function Calling",
        category: "tools",
        description: "Emitting structured tool calls",
        keywords: &["function", "tool", "tools", "gpt-4", "gpt-3.5-turbo", "hermes"],
        base_strength: 3,
    },
];

/// Look up a taxonomy entry by name.
pub fn find(name: &str) -> Option<&'static CapabilitySpec> {
    TAXONOMY.iter().find(|c| c.name == name)
}

/// Capabilities the execution engine handles natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinCapability {
    TextGeneration,
    ImageGeneration,
    CodeGeneration,
    KnowledgeRetrieval,
}

impl BuiltinCapability {
    pub const ALL: [BuiltinCapability; 4] = [
        Self::TextGeneration,
        Self::ImageGeneration,
        Self::CodeGeneration,
        Self::KnowledgeRetrieval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextGeneration => "text_generation",
            Self::ImageGeneration => "image_generation",
            Self::CodeGeneration => "code_generation",
            Self::KnowledgeRetrieval => "knowledge_retrieval",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl std::fmt::Display for BuiltinCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_taxonomy_names_unique_and_strengths_valid() {
        let mut seen = HashSet::new();
        for spec in TAXONOMY {
            assert!(seen.insert(spec.name), "duplicate {}", spec.name);
            assert!((1..=5).contains(&spec.base_strength));
            assert!(spec.keywords.iter().all(|k| *k == k.to_lowercase()));
        }
    }

    #[test]
    fn test_builtins_are_in_taxonomy() {
        for builtin in BuiltinCapability::ALL {
            assert!(find(builtin.as_str()).is_some());
            assert_eq!(BuiltinCapability::from_name(builtin.as_str()), Some(builtin));
        }
        assert_eq!(BuiltinCapability::from_name("translation"), None);
    }
}
