use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::llm::ModelConfig;
use crate::text::DEFAULT_THRESHOLD;

/// Where the game script looks for dialog data.
pub const DEFAULT_OUTPUT: &str = "data/dialog_map.json";

/// Layer count that offloads any model entirely to the GPU.
const ALL_LAYERS: u32 = 999;

#[derive(Debug, Parser)]
#[command(name = "chatai", version, about = "Generates branching NPC dialog for the Chatai game mod")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate dialog records with a local model, rewriting the output file every cycle.
    Generate(GenerateArgs),
    /// Write the built-in dialog graph.
    Static {
        #[arg(long, env = "CHATAI_OUTPUT", default_value = DEFAULT_OUTPUT)]
        output: PathBuf,
    },
    /// Walk a dialog graph in the terminal, saving progress after every reply.
    Play {
        #[arg(long, env = "CHATAI_OUTPUT", default_value = DEFAULT_OUTPUT)]
        graph: PathBuf,
    },
    /// Check a dialog graph for broken reply links.
    Validate {
        #[arg(default_value = DEFAULT_OUTPUT)]
        graph: PathBuf,
    },
}

/// Model backend used by `generate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Quantized GGUF model driven by raw completions.
    Quantized,
    /// Same as `quantized`, with a fine-tuned LoRA adapter applied.
    Adapter,
    /// Chat model asked for the whole record as JSON.
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Device {
    Cpu,
    Gpu,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Output JSON file.
    #[arg(long, env = "CHATAI_OUTPUT", default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,
    /// Seconds to wait between cycles.
    #[arg(long, env = "CHATAI_INTERVAL_SECS", default_value_t = 30)]
    pub interval_secs: u64,
    /// Stop after this many cycles (runs until interrupted otherwise).
    #[arg(long)]
    pub max_cycles: Option<u64>,
    #[arg(long, env = "CHATAI_BACKEND", value_enum, default_value_t = Backend::Quantized)]
    pub backend: Backend,
    /// GGUF model file.
    #[arg(long, env = "CHATAI_MODEL", default_value = "gemma-3n-E4B-it-IQ4_NL.gguf")]
    pub model: PathBuf,
    #[arg(long, env = "CHATAI_DEVICE", value_enum, default_value_t = Device::Cpu)]
    pub device: Device,
    /// Explicit number of GPU layers, overrides --device.
    #[arg(long)]
    pub gpu_layers: Option<u32>,
    #[arg(long, default_value_t = 4096)]
    pub n_ctx: u32,
    #[arg(long, default_value_t = 512)]
    pub max_tokens: usize,
    #[arg(long, default_value_t = 0.8)]
    pub temperature: f32,
    #[arg(long, default_value_t = 0.9)]
    pub top_p: f32,
    #[arg(long, default_value_t = 1.1)]
    pub repeat_penalty: f32,
    /// Fixed sampling seed for reproducible output. Random when omitted.
    #[arg(long)]
    pub seed: Option<u64>,
    /// LoRA adapter file, required by the `adapter` backend.
    #[arg(long, env = "CHATAI_LORA")]
    pub lora: Option<PathBuf>,
    #[arg(long, default_value_t = 1.0)]
    pub lora_scale: f32,
    /// Reply candidates requested per cycle before near-duplicates are collapsed.
    #[arg(long, default_value_t = 2)]
    pub reply_candidates: usize,
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    pub similarity_threshold: f64,
}

/// Everything the generation loop needs, fixed at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_path: PathBuf,
    pub interval: Duration,
    pub max_cycles: Option<u64>,
    pub backend: Backend,
    pub model: ModelConfig,
    pub reply_candidates: usize,
    pub similarity_threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            interval: Duration::from_secs(30),
            max_cycles: None,
            backend: Backend::Quantized,
            model: ModelConfig::default(),
            reply_candidates: 2,
            similarity_threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.model.n_ctx > 0, "n_ctx must be > 0");
        ensure!(
            (0.0..=1.0).contains(&self.similarity_threshold),
            "similarity threshold must be within [0, 1], got {}",
            self.similarity_threshold
        );
        ensure!(
            self.backend != Backend::Adapter || self.model.lora_adapter.is_some(),
            "the adapter backend needs --lora <file>"
        );
        Ok(())
    }
}

impl From<GenerateArgs> for Config {
    fn from(args: GenerateArgs) -> Self {
        let n_gpu_layers = args.gpu_layers.unwrap_or(match args.device {
            Device::Cpu => 0,
            Device::Gpu => ALL_LAYERS,
        });
        // only the adapter backend loads the adapter
        let lora_adapter = match args.backend {
            Backend::Adapter => args.lora,
            Backend::Quantized | Backend::Chat => None,
        };

        Self {
            output_path: args.output,
            interval: Duration::from_secs(args.interval_secs),
            max_cycles: args.max_cycles,
            backend: args.backend,
            model: ModelConfig {
                model_path: args.model,
                n_gpu_layers,
                n_ctx: args.n_ctx,
                max_tokens: args.max_tokens,
                temperature: args.temperature,
                top_p: args.top_p,
                repeat_penalty: args.repeat_penalty,
                seed: args.seed,
                lora_adapter,
                lora_scale: args.lora_scale,
            },
            reply_candidates: args.reply_candidates,
            similarity_threshold: args.similarity_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_config(args: &[&str]) -> Config {
        let cli = Cli::try_parse_from(["chatai", "generate"].iter().chain(args)).unwrap();
        match cli.command {
            Command::Generate(args) => args.into(),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_generate_defaults() {
        let config = generate_config(&[]);
        assert_eq!(config.output_path, PathBuf::from(DEFAULT_OUTPUT));
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.backend, Backend::Quantized);
        assert_eq!(config.model.n_gpu_layers, 0);
        assert_eq!(config.reply_candidates, 2);
        assert!(config.model.seed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fixed_seed_flag() {
        let config = generate_config(&["--seed", "42"]);
        assert_eq!(config.model.seed, Some(42));
    }

    #[test]
    fn test_gpu_device_offloads_everything() {
        let config = generate_config(&["--device", "gpu"]);
        assert_eq!(config.model.n_gpu_layers, ALL_LAYERS);
        let config = generate_config(&["--device", "gpu", "--gpu-layers", "20"]);
        assert_eq!(config.model.n_gpu_layers, 20);
    }

    #[test]
    fn test_adapter_backend_requires_lora() {
        let config = generate_config(&["--backend", "adapter"]);
        assert!(config.validate().is_err());

        let config = generate_config(&["--backend", "adapter", "--lora", "vi.gguf"]);
        assert_eq!(config.model.lora_adapter, Some(PathBuf::from("vi.gguf")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lora_ignored_outside_adapter_backend() {
        let config = generate_config(&["--backend", "chat", "--lora", "vi.gguf"]);
        assert!(config.model.lora_adapter.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = Config {
            similarity_threshold: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_static_subcommand_output() {
        let cli = Cli::try_parse_from(["chatai", "static", "--output", "/tmp/map.json"]).unwrap();
        assert!(matches!(cli.command, Command::Static { output } if output == PathBuf::from("/tmp/map.json")));
    }
}
