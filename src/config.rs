use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

const DEFAULT_ORIGINS: &str = "https://nielseriknandal.com,http://localhost:3000,http://localhost:5173";

/// Which [`crate::model::LanguageModel`] implementation the registry loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBackend {
    Torch,
    Mock,
}

impl FromStr for ModelBackend {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "torch" | "tch" => Ok(ModelBackend::Torch),
            "mock" => Ok(ModelBackend::Mock),
            other => anyhow::bail!("unknown MODEL_BACKEND '{other}' (expected torch|mock)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub device: String,
    pub backend: ModelBackend,
    pub checkpoint_path: PathBuf,
    pub model_config_path: PathBuf,
    pub max_prompt_bytes: usize,
    pub rate_limit_per_min: u32,
    pub rate_limit_burst: u32,
    pub allowed_origins: Vec<String>,
    pub stream_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let checkpoint_dir = PathBuf::from("./checkpoints");
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000),
            device: "cpu".to_string(),
            backend: ModelBackend::Torch,
            checkpoint_path: checkpoint_dir.join("best.pt"),
            model_config_path: checkpoint_dir.join("model_config.json"),
            max_prompt_bytes: 16384,
            rate_limit_per_min: 10,
            rate_limit_burst: 3,
            allowed_origins: parse_origins(DEFAULT_ORIGINS),
            stream_buffer: 32,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let listen_addr = match env::var("SERVER_ADDR") {
            Ok(raw) => raw.parse()?,
            Err(_) => {
                let host = env::var("API_HOST")
                    .ok()
                    .and_then(|h| h.parse::<IpAddr>().ok())
                    .unwrap_or(defaults.listen_addr.ip());
                let port = parse_var("API_PORT").unwrap_or(defaults.listen_addr.port());
                SocketAddr::new(host, port)
            }
        };

        let device = env::var("DEVICE").unwrap_or(defaults.device);
        let backend = match env::var("MODEL_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.backend,
        };

        let checkpoint_dir =
            PathBuf::from(env::var("CKPT_DIR").unwrap_or_else(|_| "./checkpoints".to_string()));
        let checkpoint_filename =
            env::var("CKPT_FILENAME").unwrap_or_else(|_| "best.pt".to_string());
        let checkpoint_path = checkpoint_dir.join(checkpoint_filename);
        let model_config_path = env::var("MODEL_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| checkpoint_dir.join("model_config.json"));

        let max_prompt_bytes = parse_var("MAX_PROMPT_BYTES").unwrap_or(defaults.max_prompt_bytes);
        let rate_limit_per_min =
            parse_var("RATE_LIMIT_PER_MIN").unwrap_or(defaults.rate_limit_per_min);
        let rate_limit_burst = parse_var("RATE_LIMIT_BURST").unwrap_or(defaults.rate_limit_burst);
        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or(defaults.allowed_origins);
        let stream_buffer = parse_var("STREAM_BUFFER")
            .filter(|&n: &usize| n > 0)
            .unwrap_or(defaults.stream_buffer);

        Ok(Self {
            listen_addr,
            device,
            backend,
            checkpoint_path,
            model_config_path,
            max_prompt_bytes,
            rate_limit_per_min,
            rate_limit_burst,
            allowed_origins,
            stream_buffer,
        })
    }

    /// Bucket refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.rate_limit_per_min) / 60.0
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
