mod cli;

use reelforge::{config, server};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use reelforge_av::{FfprobeInspector, Prober, Toolchain};
use reelforge_common::{FileLocator, Stream};
use std::path::{Path, PathBuf};
use std::sync::Arc;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    library: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over the config file
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(library) = library {
        config.library.root = library;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting Reelforge server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!("Library root: {}", config.library.root.display());
    tracing::info!("Session output: {}", config.transcode.temp_dir.display());

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelforge=trace,reelforge_media=trace,reelforge_av=debug,reelforge_common=debug,tower_http=debug".to_string()
        } else {
            "reelforge=debug,reelforge_media=info,reelforge_av=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start {
            host,
            port,
            library,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, library, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reelforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn toolchain(config: &config::Config) -> Toolchain {
    Toolchain::resolve(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    )
    .unwrap_or_else(|_| Toolchain::from_path_lookup())
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = toolchain(&config);
    let prober = Prober::new(
        Arc::new(FfprobeInspector::new(&tools.ffprobe)),
        config.library.root.clone(),
    );

    let container = prober
        .probe_path(file)
        .await
        .with_context(|| format!("Failed to probe {:?}", file))?;
    let streams = container.to_streams();

    if json {
        println!("{}", serde_json::to_string_pretty(&streams)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Container: {}", container.format.format_name);
    if let Some(size) = container.format.size {
        println!("Size: {} bytes", size);
    }
    if let Some(duration) = container.format.duration {
        let secs = duration as u64;
        println!(
            "Duration: {:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
    }
    if let Some(locator) = locator_for(&config.library.root, file) {
        println!("Locator: {}", locator);
    }

    println!("\nStreams: {}", streams.len());
    for stream in &streams {
        print_stream(stream);
    }

    Ok(())
}

fn locator_for(root: &Path, file: &Path) -> Option<FileLocator> {
    let root = root.canonicalize().ok()?;
    let file = file.canonicalize().ok()?;
    let relative = file.strip_prefix(root).ok()?;
    FileLocator::from_relative_path(relative).ok()
}

fn print_stream(stream: &Stream) {
    print!(
        "  [{}] {} {} ({}) {} bps",
        stream.index, stream.stream_type, stream.codec, stream.codec_name, stream.bitrate
    );
    if stream.width > 0 {
        print!(", {}x{} @ {}", stream.width, stream.height, stream.frame_rate);
    }
    if let Some(ref lang) = stream.language {
        print!(" ({})", lang);
    }
    if stream.default {
        print!(" [default]");
    }
    println!();
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = reelforge_av::check_tools(&toolchain(&config));
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Segments cannot be produced without them.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    let transcode = &config.transcode;
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Callback base: {}", config.server.callback_base());
    println!("  Library root: {}", config.library.root.display());
    println!("  Session output: {}", transcode.temp_dir.display());
    println!("  Segment duration: {}s", transcode.segment_duration_secs);
    println!("  Transmux run length: {} segments", transcode.max_transmux_segments);
    println!("  Reuse window: {} segments", transcode.reuse_window);
    println!("  Throttle ahead: {} segments", transcode.throttle_ahead_segments);
    println!("  Segment timeout: {}s", transcode.segment_timeout_secs);
    println!("  Idle timeout: {}s", transcode.idle_timeout_secs);

    Ok(())
}
