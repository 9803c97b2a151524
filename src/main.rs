use anyhow::Result;
use clap::Parser;
use duoscribe::Config;
use tracing::info;

#[derive(Parser)]
#[command(name = "duoscribe", about = "Dual-channel STT session orchestrator")]
struct Args {
    /// Config file path (without extension)
    #[arg(long, default_value = "config/duoscribe")]
    config: String,

    /// Transcription language override
    #[arg(long)]
    language: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("duoscribe v0.1.0");
    info!("Loaded config: {}", cfg.service.name);
    info!("Provider: {}", cfg.stt.provider);
    info!(
        "Language: {}",
        cfg.stt.effective_language(args.language.as_deref())
    );
    info!("Capture helper: {}", cfg.capture.binary_path);

    match cfg.stt.resolve_api_key() {
        Some(_) => info!("Transcription credentials resolved"),
        None => info!(
            "No API key found; set stt.api_key or {}",
            cfg.stt.provider.api_key_env()
        ),
    }

    Ok(())
}
