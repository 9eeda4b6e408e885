// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{path::PathBuf, time::Duration};

use beacon_analytics::{Analytics, AnalyticsConfig, DEFAULT_ENDPOINT, JsonMap};
use beacon_common_storage_queue::{QueueConfig, QueueFile};
use beacon_common_telemetry::{LogFormat, LoggingOptions, init_global_logging, set_panic_hook};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Whatever, whatever};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[clap(
name = "beacon",
about = "Send analytics events through the beacon SDK",
author = env!("CARGO_PKG_AUTHORS"),
version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Project write key.
    #[arg(long, env = "BEACON_WRITE_KEY", global = true)]
    write_key: Option<String>,

    #[arg(long, default_value = DEFAULT_ENDPOINT, global = true)]
    endpoint: String,

    /// Directory holding the queue and preferences files.
    #[arg(long, global = true)]
    queue_dir: Option<PathBuf>,

    #[arg(long, default_value = "beacon", global = true)]
    tag: String,

    /// Log filter such as `info,beacon_analytics=debug`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Seconds to wait for queued events to upload before giving up.
    #[arg(long, default_value_t = 30, global = true)]
    wait_secs: u64,
}

impl GlobalArgs {
    fn config(&self) -> Result<AnalyticsConfig, Whatever> {
        let write_key = self
            .write_key
            .clone()
            .whatever_context("--write-key or BEACON_WRITE_KEY is required")?;
        let mut config = AnalyticsConfig::builder()
            .write_key(write_key)
            .endpoint(self.endpoint.clone())
            .tag(self.tag.clone())
            .build();
        if let Some(dir) = &self.queue_dir {
            config.queue_dir.clone_from(dir);
        }
        Ok(config)
    }

    fn queue_path(&self) -> PathBuf {
        let mut config = AnalyticsConfig::builder()
            .write_key("inspect")
            .tag(self.tag.clone())
            .build();
        if let Some(dir) = &self.queue_dir {
            config.queue_dir.clone_from(dir);
        }
        config.queue_path()
    }

    fn open(&self) -> Result<Analytics, Whatever> {
        Analytics::builder()
            .config(self.config()?)
            .build()
            .whatever_context("failed to start analytics")
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Track(TrackArgs),
    Identify(IdentifyArgs),
    Flush(FlushArgs),
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Tracks one event and uploads it.
Examples:

beacon track --event 'Order Completed' --property revenue=9.99 --property currency=EUR

")]
struct TrackArgs {
    #[arg(long)]
    event: String,

    /// `key=value`; values that parse as JSON keep their type.
    #[arg(long = "property")]
    properties: Vec<String>,

    /// Identify as this user before tracking.
    #[arg(long)]
    user_id: Option<String>,
}

impl TrackArgs {
    async fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let properties = parse_pairs(&self.properties)?;
        let analytics = global.open()?;
        if let Some(user_id) = &self.user_id {
            analytics
                .identify(Some(user_id), None)
                .whatever_context("identify failed")?;
        }
        analytics
            .track(&self.event, Some(properties))
            .whatever_context("track failed")?;
        deliver(&analytics, global.wait_secs).await
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Identifies a user and uploads the identify event.
Examples:

beacon identify --user-id 42 --trait plan=pro

")]
struct IdentifyArgs {
    #[arg(long)]
    user_id: String,

    /// `key=value`; values that parse as JSON keep their type.
    #[arg(long = "trait")]
    traits: Vec<String>,
}

impl IdentifyArgs {
    async fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let traits = parse_pairs(&self.traits)?;
        let analytics = global.open()?;
        analytics
            .identify(Some(&self.user_id), Some(traits))
            .whatever_context("identify failed")?;
        deliver(&analytics, global.wait_secs).await
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Uploads whatever is left in the on-disk queue.
Examples:

beacon flush

")]
struct FlushArgs {}

impl FlushArgs {
    async fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let analytics = global.open()?;
        deliver(&analytics, global.wait_secs).await
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Prints the number of queued events and each queued record.
Examples:

beacon inspect --tag beacon

")]
struct InspectArgs {
    /// Print only the count.
    #[arg(long)]
    count_only: bool,
}

impl InspectArgs {
    fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let path = global.queue_path();
        if !path.exists() {
            println!("no queue at {}", path.display());
            return Ok(());
        }
        let mut queue = QueueFile::open(QueueConfig::new(&path))
            .with_whatever_context(|_| format!("failed to open queue at {}", path.display()))?;
        println!("{}: {} queued", path.display(), queue.size());
        if !self.count_only {
            queue
                .for_each(&mut |record| {
                    println!("{}", String::from_utf8_lossy(record));
                    true
                })
                .whatever_context("failed to read queue")?;
        }
        queue.close().whatever_context("failed to close queue")
    }
}

/// Parses `key=value` pairs. Values that are valid JSON keep their type,
/// anything else is a string.
fn parse_pairs(pairs: &[String]) -> Result<JsonMap, Whatever> {
    let mut map = JsonMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            whatever!("expected key=value, got {pair:?}");
        };
        if key.is_empty() {
            whatever!("empty key in {pair:?}");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

/// Flushes and waits for the queue to drain, then shuts the instance down.
async fn deliver(analytics: &Analytics, wait_secs: u64) -> Result<(), Whatever> {
    analytics.barrier().await.whatever_context("producer stopped")?;
    analytics.flush().whatever_context("flush failed")?;

    let drained = tokio::time::timeout(Duration::from_secs(wait_secs), async {
        while analytics.queue_size() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .is_ok();

    let remaining = analytics.queue_size();
    analytics.shutdown();
    if drained {
        info!(uploads = analytics.flush_count(), "all events delivered");
    } else {
        warn!(remaining, "events still queued, they will be retried on the next run");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    set_panic_hook();
    let logging = LoggingOptions::builder()
        .maybe_level(cli.global.log_level.clone())
        .log_format(cli.global.log_format)
        .build();
    let _guards = init_global_logging("beacon", &logging);

    match &cli.commands {
        Commands::Track(args) => args.run(&cli.global).await,
        Commands::Identify(args) => args.run(&cli.global).await,
        Commands::Flush(args) => args.run(&cli.global).await,
        Commands::Inspect(args) => args.run(&cli.global),
    }
}
