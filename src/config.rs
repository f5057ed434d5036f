//! Command-line and environment configuration for the server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::{
    analysis::PipelineSettings, artifacts::DEFAULT_CACHE_CAPACITY, detector::DetectorSettings,
    engine::EngineSettings, generator::GeneratorSettings,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "chess-vision")]
#[command(about = "Chess board photo analysis service", long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "CHESS_VISION_ADDR", default_value = "0.0.0.0:5000")]
    pub addr: SocketAddr,

    /// Piece detector ONNX model
    #[arg(long, env = "DETECTOR_MODEL", default_value = "weights/best.onnx")]
    pub detector_model: PathBuf,

    #[arg(long, env = "DETECTOR_CONFIDENCE", default_value_t = 0.25)]
    pub detector_confidence: f32,

    #[arg(long, env = "DETECTOR_IOU", default_value_t = 0.45)]
    pub detector_iou: f32,

    /// UCI engine binary
    #[arg(long, env = "STOCKFISH_PATH", default_value = "stockfish")]
    pub engine_path: String,

    /// Extra argument passed to the engine binary (repeatable)
    #[arg(
        long = "engine-arg",
        env = "ENGINE_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub engine_args: Vec<String>,

    /// Depth of the candidate search
    #[arg(long, env = "SEARCH_DEPTH", default_value_t = 20)]
    pub search_depth: u8,

    /// Depth of the per-candidate evaluation search
    #[arg(long, env = "METRICS_DEPTH", default_value_t = 15)]
    pub metrics_depth: u8,

    /// Number of candidate moves
    #[arg(long, env = "TOP_N", default_value_t = 3)]
    pub top_n: usize,

    /// Engine processes allowed to run at once
    #[arg(long, env = "MAX_ENGINES", default_value_t = 2)]
    pub max_engines: usize,

    /// Seconds before a single engine search is abandoned
    #[arg(long, env = "SEARCH_TIMEOUT_SECS", default_value_t = 30)]
    pub search_timeout_secs: u64,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    #[arg(long, env = "GROQ_MODEL", default_value = "llama3-70b-8192")]
    pub groq_model: String,

    #[arg(
        long,
        env = "GROQ_ENDPOINT",
        default_value = "https://api.groq.com/openai/v1/chat/completions"
    )]
    pub groq_endpoint: String,

    #[arg(long, env = "GROQ_TEMPERATURE", default_value_t = 0.6)]
    pub temperature: f32,

    #[arg(long, env = "GROQ_MAX_TOKENS", default_value_t = 128)]
    pub max_tokens: u32,

    #[arg(long, env = "GROQ_TOP_P", default_value_t = 0.95)]
    pub top_p: f32,

    /// Stream completions instead of waiting for the whole body
    #[arg(long, env = "GROQ_STREAM", default_value_t = true, action = clap::ArgAction::Set)]
    pub stream: bool,

    #[arg(long, env = "GENERATION_TIMEOUT_SECS", default_value_t = 60)]
    pub generation_timeout_secs: u64,

    /// Where rendered boards and sequences are written
    #[arg(long, env = "ARTIFACTS_DIR", default_value = "static/artifacts")]
    pub artifacts_dir: PathBuf,

    /// Analyses whose manifests are kept in memory; older ones are read
    /// back from disk on demand
    #[arg(long, env = "MANIFEST_CACHE", default_value_t = DEFAULT_CACHE_CAPACITY)]
    pub manifest_cache: usize,
}

impl Config {
    pub fn detector(&self) -> DetectorSettings {
        DetectorSettings {
            confidence_threshold: self.detector_confidence,
            iou_threshold: self.detector_iou,
        }
    }

    pub fn engine(&self) -> EngineSettings {
        EngineSettings {
            path: self.engine_path.clone(),
            args: self.engine_args.clone(),
            max_processes: self.max_engines,
            search_timeout: Duration::from_secs(self.search_timeout_secs),
        }
    }

    pub fn generator(&self) -> GeneratorSettings {
        GeneratorSettings {
            api_key: self.groq_api_key.clone().filter(|key| !key.is_empty()),
            endpoint: self.groq_endpoint.clone(),
            model: self.groq_model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            stream: self.stream,
            timeout: Duration::from_secs(self.generation_timeout_secs),
        }
    }

    pub fn pipeline(&self) -> PipelineSettings {
        PipelineSettings {
            search_depth: self.search_depth,
            metrics_depth: self.metrics_depth,
            top_n: self.top_n,
        }
    }
}
