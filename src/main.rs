use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use video_forge::config::Config;
use video_forge::generation::{
    AttemptPhase, CancelToken, FailureReason, GenerationOutcome, GenerationRequest, HttpTransport,
    Materializer, Orchestrator, OrchestratorState, ProgressSink, ProviderSelection,
    SUPPORTED_DURATION_SECS,
};
use video_forge::store::{AssetStore, GenerationCache};

/// Parse and validate resolution (WIDTHxHEIGHT format)
fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid resolution format '{}'. Use WIDTHxHEIGHT (e.g., 704x512)",
            s
        ));
    }
    let width: u32 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid width '{}' in resolution", parts[0]))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid height '{}' in resolution", parts[1]))?;
    if width == 0 || height == 0 {
        return Err("Resolution width and height must be greater than 0".to_string());
    }
    if width > 4096 || height > 4096 {
        return Err("Resolution exceeds maximum supported (4096x4096)".to_string());
    }
    Ok((width, height))
}

/// Parse and validate duration (1-60 seconds)
fn parse_duration(s: &str) -> Result<u32, String> {
    let secs: u32 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid duration", s))?;
    if !(1..=60).contains(&secs) {
        return Err(format!(
            "Duration must be between 1 and 60 seconds, got {}",
            secs
        ));
    }
    Ok(secs)
}

/// video-forge: image-to-video generation via hosted model providers
#[derive(Parser)]
#[command(name = "video-forge")]
#[command(version, about = "Image-to-video generation via hosted model providers")]
#[command(long_about = "Turn a source image and a text prompt into a short video by \
    calling hosted video-generation model endpoints, falling back across \
    providers until one succeeds. Finished videos land in a local gallery.")]
#[command(after_help = "EXAMPLES:
    # Generate a 2-second clip from an image
    video-forge generate --image sunset.png --prompt \"waves rolling in\"

    # Custom resolution, duration, and a pinned seed
    video-forge generate -i sunset.png -p \"waves\" -r 1024x576 -d 5 --seed 42

    # Prefer recently healthy providers over static order
    video-forge generate -i sunset.png -p \"waves\" --adaptive

    # List the last 10 generated videos
    video-forge gallery --limit 10

    # Show the configured provider order
    video-forge providers

CONFIGURATION:
    ~/.config/video-forge/config.toml (override with --config)
    Provider API tokens are read from the environment; a .env file in the
    working directory is loaded at startup.")]
struct Cli {
    /// Path to a config file (default: ~/.config/video-forge/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a video from a source image and a text prompt
    Generate {
        /// Source image to condition the video on
        #[arg(short, long, value_name = "FILE")]
        image: PathBuf,

        /// Text prompt describing the motion/content
        #[arg(short, long)]
        prompt: String,

        /// Target resolution as WIDTHxHEIGHT
        #[arg(short, long, default_value = "704x512", value_parser = parse_resolution)]
        resolution: (u32, u32),

        /// Clip length in seconds (providers typically accept 2-10)
        #[arg(short, long, default_value = "2", value_parser = parse_duration)]
        duration: u32,

        /// Pin the sampling seed instead of letting the provider randomize
        #[arg(long)]
        seed: Option<u64>,

        /// Call providers even if an identical request is cached
        #[arg(long)]
        no_cache: bool,

        /// Order providers by recent health instead of config order
        #[arg(long)]
        adaptive: bool,
    },

    /// List generated videos, newest first
    Gallery {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the configured provider order
    Providers,
}

/// Prints phase transitions as they happen during a generation call.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_phase(&self, provider_id: &str, phase: AttemptPhase) {
        match phase {
            AttemptPhase::PayloadBuilt => println!("[{}] payload ready", provider_id),
            AttemptPhase::CallSent => {
                print!("[{}] generating... ", provider_id);
                std::io::Write::flush(&mut std::io::stdout()).ok();
            }
            AttemptPhase::CallReturned => println!("done"),
            AttemptPhase::Normalizing => println!("[{}] reading reply", provider_id),
            AttemptPhase::Materializing => println!("[{}] fetching video", provider_id),
            AttemptPhase::Done => println!("[{}] finished", provider_id),
            AttemptPhase::Failed => {}
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_generate(
    config: &Config,
    image: PathBuf,
    prompt: String,
    resolution: (u32, u32),
    duration: u32,
    seed: Option<u64>,
    no_cache: bool,
    adaptive: bool,
) -> Result<(), String> {
    let (width, height) = resolution;
    let mut request = GenerationRequest::new(prompt, image, width, height, duration)
        .map_err(|e| format!("Invalid request: {}", e))?;
    if let Some(seed) = seed {
        request = request.with_seed(seed);
    }
    if !request.duration_in_supported_range() {
        eprintln!(
            "note: duration {}s is outside the {}-{}s range providers typically accept",
            duration,
            SUPPORTED_DURATION_SECS.start(),
            SUPPORTED_DURATION_SECS.end()
        );
    }

    let store = match &config.assets.dir {
        Some(dir) => AssetStore::new_initialized(dir.clone()),
        None => AssetStore::with_default_dir_initialized(),
    }
    .map_err(|e| format!("Failed to initialize gallery: {}", e))?;

    let cache = match &config.assets.cache_dir {
        Some(dir) => GenerationCache::new_initialized(dir.clone()),
        None => GenerationCache::with_default_dir_initialized(),
    }
    .map_err(|e| format!("Failed to initialize cache: {}", e))?;

    // Check if an identical request is already cached
    let fingerprint = GenerationCache::fingerprint(&request)
        .map_err(|e| format!("Failed to fingerprint request: {}", e))?;
    if !no_cache {
        if let Some(cached_path) = cache.get(&fingerprint) {
            println!("Found in cache: {}", cached_path.display());
            println!("  Fingerprint: {}", fingerprint);
            return Ok(());
        }
    }

    let providers = config.providers();
    let selection = if adaptive {
        ProviderSelection::Adaptive
    } else {
        config.orchestrator.selection
    };

    // Create the async runtime and run the generation
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create async runtime: {}", e))?;

    rt.block_on(async {
        let transport = HttpTransport::new(config.retry.call_timeout())
            .map_err(|e| format!("Failed to create HTTP transport: {}", e))?;
        let materializer =
            Materializer::new().map_err(|e| format!("Failed to create materializer: {}", e))?;

        let cancel = CancelToken::new();
        let handler_token = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            handler_token.cancel();
            eprintln!("\nReceived Ctrl+C, cancelling...");
        }) {
            log::warn!("Could not install Ctrl+C handler: {}", e);
        }

        let orchestrator = Orchestrator::new(Arc::new(transport), materializer)
            .with_retry(config.retry.policy())
            .with_selection(selection)
            .with_failure_threshold(config.orchestrator.failure_threshold)
            .with_progress(Arc::new(ConsoleProgress))
            .with_cancel_token(cancel);

        let dest = store.allocate();
        let mut state = OrchestratorState::new();

        println!("Generating video for: \"{}\"", request.prompt());
        println!();

        let outcome = orchestrator
            .generate(&request, &providers, &dest, &mut state)
            .await;

        match outcome {
            GenerationOutcome::Success {
                asset,
                provider_id,
                attempts,
            } => {
                if let Err(e) = cache.store_with_cleanup(
                    &fingerprint,
                    &asset.local_path,
                    config.assets.max_cache_mb,
                ) {
                    log::warn!("Could not cache generated video: {}", e);
                }

                println!();
                println!("Video ready!");
                println!("  Path: {}", asset.local_path.display());
                println!("  Provider: {}", provider_id);
                println!("  Size: {} bytes", asset.size_bytes);
                if !attempts.is_empty() {
                    println!("  Failed attempts before success: {}", attempts.len());
                }
                Ok(())
            }
            GenerationOutcome::Failure { reason, attempts } => {
                let attempted: Vec<&str> =
                    attempts.iter().map(|a| a.provider_id.as_str()).collect();
                match reason {
                    FailureReason::Cancelled => Err("Generation cancelled".to_string()),
                    reason if attempted.is_empty() => Err(format!("Generation failed: {}", reason)),
                    reason => Err(format!(
                        "Generation failed: {} (attempted: {})",
                        reason,
                        attempted.join(", ")
                    )),
                }
            }
        }
    })
}

fn run_gallery(config: &Config, limit: usize) -> Result<(), String> {
    let store = match &config.assets.dir {
        Some(dir) => AssetStore::new(dir.clone()),
        None => AssetStore::with_default_dir(),
    };

    let records = store
        .list(limit)
        .map_err(|e| format!("Failed to list gallery: {}", e))?;

    if records.is_empty() {
        println!("No generated videos in {}", store.dir().display());
        return Ok(());
    }

    println!("Generated videos in {}:", store.dir().display());
    for record in records {
        let size_mb = record.size_bytes as f64 / (1024.0 * 1024.0);
        println!("  {}  ({:.1} MB)", record.path.display(), size_mb);
    }
    Ok(())
}

fn run_providers(config: &Config) -> Result<(), String> {
    let providers = config.providers();
    println!("Providers in fallback order:");
    for (index, provider) in providers.iter().enumerate() {
        println!(
            "  {}. {} ({}) [{:?}]",
            index + 1,
            provider.id,
            provider.display_name,
            provider.shape
        );
        println!("     {}", provider.endpoint);
    }
    Ok(())
}

fn main() {
    // dotenv::dotenv() returns Err if .env doesn't exist, which is fine
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Generate {
            image,
            prompt,
            resolution,
            duration,
            seed,
            no_cache,
            adaptive,
        } => run_generate(
            &config, image, prompt, resolution, duration, seed, no_cache, adaptive,
        ),
        Commands::Gallery { limit } => run_gallery(&config, limit),
        Commands::Providers => run_providers(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution_valid() {
        assert_eq!(parse_resolution("704x512").unwrap(), (704, 512));
        assert_eq!(parse_resolution("1024x576").unwrap(), (1024, 576));
    }

    #[test]
    fn test_parse_resolution_invalid_format() {
        assert!(parse_resolution("704").is_err());
        assert!(parse_resolution("704x512x3").is_err());
        assert!(parse_resolution("widexhigh").is_err());
    }

    #[test]
    fn test_parse_resolution_rejects_zero_and_huge() {
        assert!(parse_resolution("0x512").is_err());
        assert!(parse_resolution("704x0").is_err());
        assert!(parse_resolution("8192x512").is_err());
    }

    #[test]
    fn test_parse_duration_bounds() {
        assert_eq!(parse_duration("2").unwrap(), 2);
        assert_eq!(parse_duration("60").unwrap(), 60);
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("61").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_env_var_accessible_after_dotenv() {
        // dotenv::dotenv() returns Err if .env doesn't exist, which is fine
        let _ = dotenv::dotenv();
        std::env::set_var("VIDEO_FORGE_TEST_VAR", "set");
        assert_eq!(
            std::env::var("VIDEO_FORGE_TEST_VAR").as_deref(),
            Ok("set")
        );
        std::env::remove_var("VIDEO_FORGE_TEST_VAR");
    }
}
