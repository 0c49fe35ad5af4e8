use anyhow::{Context, Result};
use clap::Parser;
use feed::{
    load_feed, ApiClient, CounterKind, FeedConfig, FeedController, FeedError, FeedLoad,
    HeadlessMedia, Key, MediaElement, UploadReceipt,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Drive the short-video feed from the terminal
#[derive(Parser, Debug)]
#[command(name = "feed", version, about)]
struct Cli {
    /// KEY=value settings file
    #[arg(long, default_value = ".env")]
    settings: PathBuf,

    /// Override the media store API base address
    #[arg(long)]
    api_base: Option<String>,

    /// Upload this file and exit
    #[arg(long)]
    upload: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let mut config = FeedConfig::load(&cli.settings).context("Failed to load settings")?;
    if let Some(base) = cli.api_base {
        config.api_base = base;
    }
    info!(api_base = %config.api_base, "Starting feed");

    let client = ApiClient::new(&config.api_base).context("Failed to build API client")?;

    if let Some(path) = cli.upload {
        let receipt = upload(&client, &path).await?;
        println!("{} {}", receipt.file_name, receipt.url);
        return Ok(());
    }

    let mut controller: FeedController<HeadlessMedia> = FeedController::from_config(&config);
    match load_feed(&mut controller, &client).await {
        FeedLoad::Failed(message) => println!("Could not load videos: {}", message),
        outcome => info!(outcome = ?outcome, items = controller.items().len(), "Feed loaded"),
    }
    print_summary(&controller);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        let arg = parts.next();

        let result = match command {
            "down" | "j" => {
                controller.handle_key(Key::ArrowDown);
                Ok(())
            }
            "up" | "k" => {
                controller.handle_key(Key::ArrowUp);
                Ok(())
            }
            "space" => {
                controller.handle_key(Key::Space);
                Ok(())
            }
            "click" => index(arg).and_then(|i| Ok(controller.click(i)?)),
            "error" => {
                index(arg).and_then(|i| Ok(controller.report_media_error(i, "reported by host")?))
            }
            "retry" => index(arg).and_then(|i| Ok(controller.retry(i)?)),
            "like" => counter(&mut controller, CounterKind::Like),
            "comment" => counter(&mut controller, CounterKind::Comment),
            "share" => counter(&mut controller, CounterKind::Share),
            "tick" => {
                let secs: f64 = arg.unwrap_or("1").parse().unwrap_or(1.0);
                advance(&mut controller, Duration::from_secs_f64(secs.max(0.0)));
                Ok(())
            }
            "upload" => match arg {
                Some(path) => {
                    let result = upload(&client, Path::new(path)).await;
                    let result = result.map_err(|e| FeedError::NetworkFailure(format!("{:#}", e)));
                    controller.report_upload(result, Instant::now());
                    Ok(())
                }
                None => Err(anyhow::anyhow!("usage: upload PATH")),
            },
            "status" => Ok(()),
            "quit" | "q" => break,
            other => Err(anyhow::anyhow!("unknown command: {}", other)),
        };

        if let Err(e) = result {
            warn!(error = %e, "Command failed");
        }
        print_summary(&controller);
    }

    Ok(())
}

fn index(arg: Option<&str>) -> Result<usize> {
    arg.context("missing item index")?
        .parse()
        .context("item index must be a number")
}

fn counter(controller: &mut FeedController<HeadlessMedia>, kind: CounterKind) -> Result<()> {
    controller.increment(kind);
    Ok(())
}

/// Move the playhead of the current item
fn advance(controller: &mut FeedController<HeadlessMedia>, by: Duration) {
    if let Some(current) = controller.state().current() {
        if let Some(media) = controller.media_mut(current) {
            media.advance(by);
        }
    }
}

async fn upload(client: &ApiClient, path: &Path) -> Result<UploadReceipt> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video.mp4".to_string());

    Ok(client.upload_video(&file_name, data).await?)
}

fn print_summary(controller: &FeedController<HeadlessMedia>) {
    let current = controller.state().current();
    let item = current.and_then(|i| controller.item(i));
    let counters = controller.counters();

    println!(
        "items={} current={} state={} position={:.1}s loaded={:?} playing={} likes={} comments={} shares={}",
        controller.items().len(),
        current.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string()),
        item.map(|i| format!("{:?}", i.state())).unwrap_or_else(|| "-".to_string()),
        item.map(|i| i.media().position().as_secs_f64())
            .unwrap_or(0.0),
        controller.state().loaded(),
        controller.playing_count(),
        counters.like,
        counters.comment,
        counters.share,
    );

    if let Some(banner) = controller.status(Instant::now()) {
        println!("[{:?}] {}", banner.kind, banner.message);
    }
    for (i, item) in controller.items().iter().enumerate() {
        if item.overlay_visible() {
            println!("item {} unavailable, `retry {}` to reload", i, i);
        }
    }
}
