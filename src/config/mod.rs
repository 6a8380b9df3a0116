use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub embedding: EmbeddingConfig,
    pub council: CouncilSettings,
    pub retrieval: RetrievalSettings,
    pub review: ReviewSettings,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
}

/// Model gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Embedding provider configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Provider model identifier.
    pub model: String,
    /// Fixed output dimensionality.
    pub dim: usize,
    /// Remote endpoint; empty selects the local deterministic provider.
    pub base_url: String,
    pub api_key: String,
}

/// Council protocol settings
#[derive(Debug, Clone)]
pub struct CouncilSettings {
    /// Models participating in stages 1 and 2.
    pub council_models: Vec<String>,
    /// Synthesis model for stage 3. Never a council member.
    pub chairman_model: String,
    /// Bootstrap iterations for stage 2 (1-20).
    pub bootstrap_iterations: usize,
    /// Disable to run a single non-randomized ranking pass.
    pub enable_bootstrap: bool,
    /// Rank aggregation method.
    pub aggregation: AggregationMethod,
    /// Fall back to the best stage-1 response if the chairman fails.
    pub chairman_fallback: bool,
    /// Per-call timeout for council models, milliseconds.
    pub model_timeout_ms: u64,
    /// Per-call timeout for the chairman, milliseconds.
    pub chairman_timeout_ms: u64,
    /// Bounded chairman refinement passes when validation fails.
    pub max_refinements: u32,
}

/// Rank aggregation method for bootstrap evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AggregationMethod {
    #[default]
    Borda,
    PositionAverage,
    Consensus,
}

impl std::fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationMethod::Borda => write!(f, "borda"),
            AggregationMethod::PositionAverage => write!(f, "position_avg"),
            AggregationMethod::Consensus => write!(f, "consensus"),
        }
    }
}

impl std::str::FromStr for AggregationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "borda" | "borda_count" => Ok(AggregationMethod::Borda),
            "position_avg" | "position_average" => Ok(AggregationMethod::PositionAverage),
            "consensus" | "consensus_score" => Ok(AggregationMethod::Consensus),
            _ => Err(format!("Unknown aggregation method: {}", s)),
        }
    }
}

/// Retrieval defaults
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    /// Hard budget for a retrieval pass, milliseconds.
    pub search_budget_ms: u64,
    /// Token budget for the synthesized context bundle.
    pub context_token_budget: usize,
}

/// Review SLA settings
#[derive(Debug, Clone)]
pub struct ReviewSettings {
    /// Hours before a synthesis review breaches SLA.
    pub synthesis_sla_hours: i64,
    /// Hours before a report review breaches SLA.
    pub report_sla_hours: i64,
    /// High-priority multiplier applied to the base SLA (e.g. 0.5 halves it).
    pub priority_factor: f64,
    /// Maximum revision rounds per review type.
    pub revision_limit: u32,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let gateway = GatewayConfig {
            api_key: env::var("GATEWAY_API_KEY").map_err(|_| AppError::Config {
                message: "GATEWAY_API_KEY is required".to_string(),
            })?,
            base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://gateway.example.com".to_string()),
        };

        let embedding = EmbeddingConfig {
            model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            dim: env::var("EMBEDDING_DIM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(384),
            base_url: env::var("EMBEDDING_BASE_URL").unwrap_or_default(),
            api_key: env::var("EMBEDDING_API_KEY").unwrap_or_default(),
        };

        let council_models: Vec<String> = env::var("COUNCIL_MODELS")
            .unwrap_or_else(|_| {
                "gateway/gemini-flash,gateway/grok-2,gateway/gpt-4".to_string()
            })
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let council = CouncilSettings {
            council_models,
            chairman_model: env::var("CHAIRMAN_MODEL")
                .unwrap_or_else(|_| "gateway/claude-sonnet".to_string()),
            bootstrap_iterations: env::var("BOOTSTRAP_ITERATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            enable_bootstrap: env::var("ENABLE_BOOTSTRAP")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(true),
            aggregation: env::var("AGGREGATION_METHOD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            chairman_fallback: env::var("CHAIRMAN_FALLBACK")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(true),
            model_timeout_ms: env::var("MODEL_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60_000),
            chairman_timeout_ms: env::var("CHAIRMAN_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120_000),
            max_refinements: env::var("MAX_REFINEMENTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        };

        let retrieval = RetrievalSettings {
            top_k: env::var("RETRIEVAL_TOP_K")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            dense_weight: env::var("DENSE_WEIGHT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.7),
            sparse_weight: env::var("SPARSE_WEIGHT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.3),
            search_budget_ms: env::var("SEARCH_BUDGET_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),
            context_token_budget: env::var("CONTEXT_TOKEN_BUDGET")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8_192),
        };

        let review = ReviewSettings {
            synthesis_sla_hours: env::var("SYNTHESIS_SLA_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(24),
            report_sla_hours: env::var("REPORT_SLA_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(48),
            priority_factor: env::var("REVIEW_PRIORITY_FACTOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.5),
            revision_limit: env::var("REVISION_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/assessments.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30_000),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            retry_delay_ms: env::var("RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1_000),
        };

        let config = Config {
            gateway,
            embedding,
            council,
            retrieval,
            review,
            database,
            logging,
            request,
        };
        config.validate()?;
        Ok(config)
    }

    /// Startup invariants. The chairman must not sit on the council: it
    /// only sees the complete deliberation record, never stages 1 or 2.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.council.council_models.is_empty() {
            return Err(AppError::Config {
                message: "COUNCIL_MODELS must name at least one model".to_string(),
            });
        }
        if self
            .council
            .council_models
            .contains(&self.council.chairman_model)
        {
            return Err(AppError::Config {
                message: format!(
                    "chairman model '{}' cannot be in COUNCIL_MODELS",
                    self.council.chairman_model
                ),
            });
        }
        if !(1..=20).contains(&self.council.bootstrap_iterations) {
            return Err(AppError::Config {
                message: format!(
                    "BOOTSTRAP_ITERATIONS must be in 1..=20, got {}",
                    self.council.bootstrap_iterations
                ),
            });
        }
        let weight_sum = self.retrieval.dense_weight + self.retrieval.sparse_weight;
        if self.retrieval.dense_weight < 0.0
            || self.retrieval.sparse_weight < 0.0
            || (weight_sum - 1.0).abs() > 1e-3
        {
            return Err(AppError::Config {
                message: format!(
                    "retrieval weights must be non-negative and sum to 1.0, got {} + {}",
                    self.retrieval.dense_weight, self.retrieval.sparse_weight
                ),
            });
        }
        Ok(())
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            dense_weight: 0.7,
            sparse_weight: 0.3,
            search_budget_ms: 5_000,
            context_token_budget: 8_192,
        }
    }
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            synthesis_sla_hours: 24,
            report_sla_hours: 48,
            priority_factor: 0.5,
            revision_limit: 3,
        }
    }
}

impl Default for CouncilSettings {
    fn default() -> Self {
        Self {
            council_models: vec![
                "gateway/gemini-flash".to_string(),
                "gateway/grok-2".to_string(),
                "gateway/gpt-4".to_string(),
            ],
            chairman_model: "gateway/claude-sonnet".to_string(),
            bootstrap_iterations: 5,
            enable_bootstrap: true,
            aggregation: AggregationMethod::Borda,
            chairman_fallback: true,
            model_timeout_ms: 60_000,
            chairman_timeout_ms: 120_000,
            max_refinements: 2,
        }
    }
}
