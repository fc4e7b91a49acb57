//! Static model catalog
//!
//! Used whenever the inference engine does not supply its own catalog.
//! Sizes are the published GGUF file sizes and only serve as a progress
//! estimate when a server omits `Content-Length`.

use serde::{Deserialize, Serialize};

/// Coarse speed/quality classification used for grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Lightweight,
    Balanced,
    Accurate,
    /// User-provided model
    Custom,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lightweight => write!(f, "lightweight"),
            Self::Balanced => write!(f, "balanced"),
            Self::Accurate => write!(f, "accurate"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Immutable metadata describing one downloadable model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique key (e.g., "qwen2.5-1.5b")
    pub id: String,
    pub name: String,
    pub vendor: String,
    /// File name inside the models directory, not derived from the id
    pub filename: String,
    pub download_url: String,
    /// Expected size in bytes
    pub size_bytes: u64,
    #[serde(default)]
    pub context_length: u32,
    /// 0-10 scale
    pub speed_rating: f32,
    /// 0-10 scale
    pub quality_rating: f32,
    pub languages: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub tier: ModelTier,
    #[serde(default)]
    pub is_default: bool,
}

impl ModelDescriptor {
    pub fn is_multilingual(&self) -> bool {
        self.languages.len() > 1
    }
}

struct CatalogEntry {
    id: &'static str,
    name: &'static str,
    vendor: &'static str,
    filename: &'static str,
    download_url: &'static str,
    size_bytes: u64,
    context_length: u32,
    speed_rating: f32,
    quality_rating: f32,
    languages: &'static [&'static str],
    description: &'static str,
    tier: ModelTier,
}

const DEFAULT_MODEL_ID: &str = "qwen2.5-1.5b";

static CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        id: "qwen2.5-1.5b",
        name: "Qwen 2.5 1.5B (Balanced)",
        vendor: "Alibaba",
        filename: "qwen2.5-1.5b-instruct-q4_k_m.gguf",
        download_url: "https://huggingface.co/Qwen/Qwen2.5-1.5B-Instruct-GGUF/resolve/main/qwen2.5-1.5b-instruct-q4_k_m.gguf",
        size_bytes: 1_050_000_000,
        context_length: 32768,
        speed_rating: 8.0,
        quality_rating: 8.4,
        languages: &[
            "en", "de", "fr", "es", "it", "pt", "nl", "pl", "ru", "zh", "ja", "ko", "ar", "vi",
            "th", "id", "ms", "tl", "hi", "bn", "ta", "te", "mr", "ur", "fa", "tr", "he", "uk",
            "cs",
        ],
        description: "Best overall balance of speed and quality with broad language support.",
        tier: ModelTier::Balanced,
    },
    CatalogEntry {
        id: "phi3-mini",
        name: "Phi-3 Mini (Accurate)",
        vendor: "Microsoft",
        filename: "Phi-3-mini-4k-instruct-q4.gguf",
        download_url: "https://huggingface.co/microsoft/Phi-3-mini-4k-instruct-gguf/resolve/main/Phi-3-mini-4k-instruct-q4.gguf",
        size_bytes: 2_300_000_000,
        context_length: 4096,
        speed_rating: 6.5,
        quality_rating: 9.6,
        languages: &["en"],
        description: "Highest writing quality with minimal hallucination.",
        tier: ModelTier::Accurate,
    },
    CatalogEntry {
        id: "llama-3.2-3b",
        name: "Llama 3.2 3B (Balanced)",
        vendor: "Meta",
        filename: "Llama-3.2-3B-Instruct-Q4_K_M.gguf",
        download_url: "https://huggingface.co/bartowski/Llama-3.2-3B-Instruct-GGUF/resolve/main/Llama-3.2-3B-Instruct-Q4_K_M.gguf",
        size_bytes: 2_019_377_696,
        context_length: 8192,
        speed_rating: 7.0,
        quality_rating: 8.5,
        languages: &["en", "de", "fr", "it", "pt", "hi", "es", "th"],
        description: "Compact multilingual model with strong quality.",
        tier: ModelTier::Balanced,
    },
    CatalogEntry {
        id: "gemma2-2b",
        name: "Gemma 2 2B (Lightweight)",
        vendor: "Google",
        filename: "gemma-2-2b-it-Q4_K_M.gguf",
        download_url: "https://huggingface.co/bartowski/gemma-2-2b-it-GGUF/resolve/main/gemma-2-2b-it-Q4_K_M.gguf",
        size_bytes: 1_708_582_752,
        context_length: 8192,
        speed_rating: 9.0,
        quality_rating: 7.0,
        languages: &["en"],
        description: "Edge-optimized model for machines with 8GB of memory.",
        tier: ModelTier::Lightweight,
    },
    CatalogEntry {
        id: "llama-3.2-1b",
        name: "Llama 3.2 1B (Lightweight)",
        vendor: "Meta",
        filename: "Llama-3.2-1B-Instruct-Q4_K_M.gguf",
        download_url: "https://huggingface.co/bartowski/Llama-3.2-1B-Instruct-GGUF/resolve/main/Llama-3.2-1B-Instruct-Q4_K_M.gguf",
        size_bytes: 807_694_464,
        context_length: 8192,
        speed_rating: 9.5,
        quality_rating: 6.0,
        languages: &["en", "de", "fr", "it", "pt", "hi", "es", "th"],
        description: "Fastest suggestions on older hardware.",
        tier: ModelTier::Lightweight,
    },
];

impl CatalogEntry {
    fn to_descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            id: self.id.to_string(),
            name: self.name.to_string(),
            vendor: self.vendor.to_string(),
            filename: self.filename.to_string(),
            download_url: self.download_url.to_string(),
            size_bytes: self.size_bytes,
            context_length: self.context_length,
            speed_rating: self.speed_rating,
            quality_rating: self.quality_rating,
            languages: self.languages.iter().map(|s| (*s).to_string()).collect(),
            description: self.description.to_string(),
            tier: self.tier,
            is_default: self.id == DEFAULT_MODEL_ID,
        }
    }
}

/// All statically known models
pub fn static_catalog() -> Vec<ModelDescriptor> {
    CATALOG.iter().map(CatalogEntry::to_descriptor).collect()
}

/// Id of the recommended default model
pub fn default_model_id() -> &'static str {
    DEFAULT_MODEL_ID
}
