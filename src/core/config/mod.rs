//! Configuration types and management for compset-rs.
//!
//! A [`CompsetConfig`] value is built once and handed to the analysis
//! context at construction. Nothing in the library reads configuration
//! from ambient global state.

pub mod validation;


use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{CompsetError, Result};

pub use validation::{
    validate_non_empty, validate_open_unit_range, validate_positive_f64, validate_positive_usize,
    validate_unit_range,
};

/// Output language for prompts, default names and sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Language {
    /// English
    #[serde(rename = "en")]
    En,
    /// Traditional Chinese (Taiwan)
    #[serde(rename = "zh-TW")]
    #[default]
    ZhTw,
}

impl Language {
    /// Parse a language tag such as `en` or `zh-TW`.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "en" | "en-us" | "english" => Ok(Self::En),
            "zh-tw" | "zh_tw" | "zh" | "chinese" => Ok(Self::ZhTw),
            other => Err(CompsetError::config_field(
                format!("unsupported language '{other}'"),
                "language",
            )),
        }
    }

    /// Canonical tag.
    pub fn tag(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::ZhTw => "zh-TW",
        }
    }
}

/// Statistical settings for the synchronous pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisSettings {
    /// Maximum tolerated proportion of missing values per attribute column
    #[serde(default = "AnalysisSettings::default_na_threshold")]
    pub na_threshold: f64,
    /// Apply the floor transform before similarity clustering
    #[serde(default)]
    pub modify_data: bool,
    /// Columns never treated as attributes
    #[serde(default = "AnalysisSettings::default_excluded_columns")]
    pub excluded_columns: Vec<String>,
    /// Column holding the item identifier
    #[serde(default = "AnalysisSettings::default_id_column")]
    pub id_column: String,
    /// Column holding the brand
    #[serde(default = "AnalysisSettings::default_brand_column")]
    pub brand_column: String,
    /// Welch t-test p-value cutoff
    #[serde(default = "AnalysisSettings::default_significance_threshold")]
    pub significance_threshold: f64,
    /// Minimum Cohen's d for an attribute to count as a strength
    #[serde(default = "AnalysisSettings::default_effect_size_threshold")]
    pub effect_size_threshold: f64,
    /// Number of k-means restarts in the clustering fallback
    #[serde(default = "AnalysisSettings::default_kmeans_restarts")]
    pub kmeans_restarts: usize,
    /// Seed for k-means initialisation
    #[serde(default = "AnalysisSettings::default_kmeans_seed")]
    pub kmeans_seed: u64,
    /// Lloyd iterations per k-means restart
    #[serde(default = "AnalysisSettings::default_kmeans_max_iterations")]
    pub kmeans_max_iterations: usize,
    /// Iteration cap for non-metric MDS
    #[serde(default = "AnalysisSettings::default_mds_max_iterations")]
    pub mds_max_iterations: usize,
    /// Stress improvement below which MDS stops
    #[serde(default = "AnalysisSettings::default_mds_tolerance")]
    pub mds_tolerance: f64,
    /// Revenue-like column names, first match wins
    #[serde(default = "AnalysisSettings::default_revenue_candidates")]
    pub revenue_candidates: Vec<String>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            na_threshold: Self::default_na_threshold(),
            modify_data: false,
            excluded_columns: Self::default_excluded_columns(),
            id_column: Self::default_id_column(),
            brand_column: Self::default_brand_column(),
            significance_threshold: Self::default_significance_threshold(),
            effect_size_threshold: Self::default_effect_size_threshold(),
            kmeans_restarts: Self::default_kmeans_restarts(),
            kmeans_seed: Self::default_kmeans_seed(),
            kmeans_max_iterations: Self::default_kmeans_max_iterations(),
            mds_max_iterations: Self::default_mds_max_iterations(),
            mds_tolerance: Self::default_mds_tolerance(),
            revenue_candidates: Self::default_revenue_candidates(),
        }
    }
}

/// Default value providers for [`AnalysisSettings`].
impl AnalysisSettings {
    const fn default_na_threshold() -> f64 {
        0.5
    }

    fn default_excluded_columns() -> Vec<String> {
        ["product_id", "asin", "brand", "platform_id", "product_line_id"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn default_id_column() -> String {
        "product_id".to_string()
    }

    fn default_brand_column() -> String {
        "brand".to_string()
    }

    const fn default_significance_threshold() -> f64 {
        0.05
    }

    const fn default_effect_size_threshold() -> f64 {
        0.5
    }

    const fn default_kmeans_restarts() -> usize {
        25
    }

    const fn default_kmeans_seed() -> u64 {
        42
    }

    const fn default_kmeans_max_iterations() -> usize {
        100
    }

    const fn default_mds_max_iterations() -> usize {
        300
    }

    const fn default_mds_tolerance() -> f64 {
        1e-6
    }

    fn default_revenue_candidates() -> Vec<String> {
        ["sales", "revenue", "total_revenue", "sales_amount", "amount"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Validate the statistical settings.
    pub fn validate(&self) -> Result<()> {
        validate_unit_range(self.na_threshold, "analysis.na_threshold")?;
        validate_open_unit_range(
            self.significance_threshold,
            "analysis.significance_threshold",
        )?;
        if !self.effect_size_threshold.is_finite() || self.effect_size_threshold < 0.0 {
            return Err(CompsetError::config_field(
                "analysis.effect_size_threshold must be a non-negative number",
                "analysis.effect_size_threshold",
            ));
        }
        validate_positive_usize(self.kmeans_restarts, "analysis.kmeans_restarts")?;
        validate_positive_usize(self.kmeans_max_iterations, "analysis.kmeans_max_iterations")?;
        validate_positive_usize(self.mds_max_iterations, "analysis.mds_max_iterations")?;
        validate_positive_f64(self.mds_tolerance, "analysis.mds_tolerance")?;
        validate_non_empty(&self.id_column, "analysis.id_column")?;
        validate_non_empty(&self.brand_column, "analysis.brand_column")?;
        Ok(())
    }
}

/// Presentation-only settings. Changing these never re-runs analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplaySettings {
    /// Plot marker size
    #[serde(default = "DisplaySettings::default_marker_size")]
    pub marker_size: f64,
    /// Plot cluster centers
    #[serde(default)]
    pub show_centers: bool,
    /// Brand whose items are highlighted on the map
    #[serde(default)]
    pub highlight_brand: Option<String>,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            marker_size: Self::default_marker_size(),
            show_centers: false,
            highlight_brand: None,
        }
    }
}

impl DisplaySettings {
    const fn default_marker_size() -> f64 {
        10.0
    }
}

/// Settings for the external text-generation service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSettings {
    /// Chat completions endpoint
    #[serde(default = "ServiceSettings::default_api_endpoint")]
    pub api_endpoint: String,
    /// Environment variable holding the API key
    #[serde(default = "ServiceSettings::default_api_key_env")]
    pub api_key_env: String,
    /// Model identifier sent with every request
    #[serde(default = "ServiceSettings::default_model")]
    pub model: String,
    /// Request timeout; a timeout is a terminal error for that invocation
    #[serde(default = "ServiceSettings::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sampling temperature
    #[serde(default = "ServiceSettings::default_temperature")]
    pub temperature: f32,
    /// Word cap per report section
    #[serde(default = "ServiceSettings::default_max_report_words")]
    pub max_report_words: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            api_endpoint: Self::default_api_endpoint(),
            api_key_env: Self::default_api_key_env(),
            model: Self::default_model(),
            timeout_secs: Self::default_timeout_secs(),
            temperature: Self::default_temperature(),
            max_report_words: Self::default_max_report_words(),
        }
    }
}

impl ServiceSettings {
    fn default_api_endpoint() -> String {
        "https://api.openai.com/v1/chat/completions".to_string()
    }

    fn default_api_key_env() -> String {
        "OPENAI_API_KEY".to_string()
    }

    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }

    const fn default_timeout_secs() -> u64 {
        60
    }

    const fn default_temperature() -> f32 {
        0.3
    }

    const fn default_max_report_words() -> usize {
        150
    }

    /// Validate the service settings.
    pub fn validate(&self) -> Result<()> {
        validate_non_empty(&self.api_endpoint, "service.api_endpoint")?;
        validate_non_empty(&self.model, "service.model")?;
        if self.timeout_secs == 0 {
            return Err(CompsetError::config_field(
                "service.timeout_secs must be greater than 0",
                "service.timeout_secs",
            ));
        }
        validate_positive_usize(self.max_report_words, "service.max_report_words")?;
        Ok(())
    }
}

/// Main configuration for a competitive set analysis context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CompsetConfig {
    /// Statistical pipeline settings
    #[serde(default)]
    pub analysis: AnalysisSettings,
    /// Presentation settings
    #[serde(default)]
    pub display: DisplaySettings,
    /// External service settings
    #[serde(default)]
    pub service: ServiceSettings,
    /// Prompt and label language
    #[serde(default)]
    pub language: Language,
}

/// Configuration construction and I/O methods for [`CompsetConfig`].
impl CompsetConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            CompsetError::io(format!("Failed to read config file: {}", path.display()), e)
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn to_yaml_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(|e| {
            CompsetError::io(format!("Failed to write config file: {}", path.display()), e)
        })
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        self.service.validate()?;
        if !self.display.marker_size.is_finite() || self.display.marker_size <= 0.0 {
            return Err(CompsetError::config_field(
                "display.marker_size must be greater than 0.0",
                "display.marker_size",
            ));
        }
        Ok(())
    }

    /// Builder-style language override.
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Builder-style NA threshold override.
    pub fn with_na_threshold(mut self, threshold: f64) -> Self {
        self.analysis.na_threshold = threshold;
        self
    }

    /// Builder-style floor transform toggle.
    pub fn with_modify_data(mut self, enabled: bool) -> Self {
        self.analysis.modify_data = enabled;
        self
    }
}
