use std::process::ExitCode;

use bb84_postprocessing::prelude::*;
use bb84_postprocessing::simulation::run_batch;
use log::{error, info};

fn run() -> Result<()> {
    let config = SimulationConfig::from_env()?;
    info!(
        "simulating {} runs: {} sifted bits, noise {:.3}, sample {}",
        config.runs, config.key_length, config.noise, config.sample_size
    );
    let link = BinarySymmetricLink::new(config.noise)?;
    let results = run_batch(&link, &config);

    for (run, result) in results.iter().enumerate() {
        match &result.failure {
            None => println!(
                "run {:>3}: {:>6} bits  qber {:.4}  leakage {:>5}  corrected {:>4}",
                run, result.key_length, result.qber, result.leakage, result.errors_corrected
            ),
            Some(failure) => println!("run {:>3}: {} ({})", run, failure.code, failure.message),
        }
    }

    let keys: Vec<&QkdResult> = results.iter().filter(|r| r.success).collect();
    if !keys.is_empty() {
        let mean = keys.iter().map(|r| r.key_length as f64).sum::<f64>() / keys.len() as f64;
        println!(
            "{}/{} runs succeeded, mean key length {:.1} bits ({:.3} of sifted)",
            keys.len(),
            results.len(),
            mean,
            mean / config.key_length as f64
        );
    }
    if std::env::var_os("QKD_JSON").is_some() {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("simulation failed: {err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
