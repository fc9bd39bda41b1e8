use anyhow::{Context, Result};
use cambackup_bucket_stats::{gather, render, Config, ReportError, S3Inspector};
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.logging.level);

    let destination = config.destination();
    println!("Analyzing bucket: {}", destination);
    println!("This may take a moment for large buckets...\n");

    let inspector = S3Inspector::new(&config.s3).await;

    let report = match gather(&inspector, destination).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Bucket report failed");
            if !matches!(e, ReportError::NoSuchBucket(_)) {
                eprintln!("Make sure AWS credentials are configured (aws configure)");
            }
            return Err(e).context("Failed to list bucket");
        }
    };

    print!("{}", render(&report));

    Ok(())
}

/// Logs go to stderr so the report on stdout stays clean.
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
