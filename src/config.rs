use clap::Parser;
use std::net::SocketAddr;

use crate::props::{Smoothing, DEFAULT_N_SAMPLES};

/// NBA player-prop probability service
#[derive(Parser, Debug, Clone)]
#[command(name = "sgp-props", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "nba_props.db")]
    pub database_path: String,

    /// HTTP API listen address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8000")]
    pub api_addr: String,

    /// Comma-separated CORS origins ("*" allows any)
    #[arg(long, env = "ALLOW_ORIGINS", default_value = "http://localhost:5173")]
    pub allow_origins: String,

    /// Monte Carlo draws for a parlay when the request does not say
    #[arg(long, env = "DEFAULT_SAMPLES", default_value_t = DEFAULT_N_SAMPLES)]
    pub default_samples: usize,

    /// Upper bound on requested Monte Carlo draws
    #[arg(long, env = "MAX_SAMPLES", default_value = "200000")]
    pub max_samples: usize,

    /// Jitter single-leg samples before thresholding (true/false)
    #[arg(
        long,
        env = "MARGINAL_JITTER",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub marginal_jitter: bool,

    /// Standard deviation of the single-leg jitter
    #[arg(long, env = "JITTER_STD", default_value = "0.05")]
    pub jitter_std: f64,

    /// Smallest sample the jitter is applied to
    #[arg(long, env = "JITTER_MIN_SAMPLES", default_value = "10")]
    pub jitter_min_samples: usize,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!("api_addr must be a socket address like 0.0.0.0:8000");
        }
        if self.max_samples == 0 {
            anyhow::bail!("max_samples must be at least 1");
        }
        if self.default_samples == 0 || self.default_samples > self.max_samples {
            anyhow::bail!("default_samples must be between 1 and max_samples");
        }
        if !self.jitter_std.is_finite() || self.jitter_std < 0.0 {
            anyhow::bail!("jitter_std must be a non-negative number");
        }
        if self.allowed_origins().is_empty() {
            anyhow::bail!("allow_origins must name at least one origin");
        }
        Ok(())
    }

    /// Smoothing policy for single-leg estimates.
    pub fn smoothing(&self) -> Smoothing {
        if self.marginal_jitter {
            Smoothing::Jitter {
                std_dev: self.jitter_std,
                min_samples: self.jitter_min_samples,
            }
        } else {
            Smoothing::Off
        }
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.allow_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }
}
