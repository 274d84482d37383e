//! `signpipe sign` - compute the combined signature of a list of integers

use anyhow::{Context, Result};
use clap::Args;
use signpipe_core::{Pipeline, PipelineConfig, SharedProgress, SignerContext, fmt_num};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Integers to sign
    #[arg(default_values_t = [0, 1], allow_negative_numbers = true)]
    pub items: Vec<i64>,

    /// Capacity of each inter-stage queue
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Maximum items processed at once per stage
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Simulated latency of the fast hash, in milliseconds
    #[arg(long)]
    pub fast_delay_ms: Option<u64>,

    /// Simulated latency of the slow hash, in milliseconds
    #[arg(long)]
    pub slow_delay_ms: Option<u64>,
}

impl SignArgs {
    /// Apply CLI overrides on top of the loaded config.
    fn apply(&self, mut config: Config) -> Config {
        if let Some(n) = self.queue_capacity {
            config.pipeline.queue_capacity = n;
        }
        if let Some(n) = self.max_in_flight {
            config.pipeline.max_in_flight = n;
        }
        if let Some(ms) = self.fast_delay_ms {
            config.signer.fast_delay_ms = ms;
        }
        if let Some(ms) = self.slow_delay_ms {
            config.signer.slow_delay_ms = ms;
        }
        config
    }
}

pub fn run(args: SignArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let config = args.apply(config.clone());
    let pipeline_config: PipelineConfig = config.pipeline_config();
    pipeline_config.validate()?;

    let pipeline = Pipeline::new(SignerContext::new(config.signer()), pipeline_config);

    let pb = progress.stage_line("sign");
    pb.set_message(format!("{} items", fmt_num(args.items.len())));
    let result = pipeline.run(&args.items);
    pb.finish_and_clear();

    let signature = result.context("Signing pipeline failed")?;
    println!("{signature}");
    Ok(())
}
