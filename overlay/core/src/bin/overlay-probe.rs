//! Overlay Probe
//!
//! Diagnostic tool for the overlay protocol: shows how the server reads a
//! request, and encodes or decodes overlay identifiers.
//!
//! # Usage
//!
//! ```bash
//! # Inspect a request the way the server parses it
//! overlay-probe --url '/users?overlay=a' -H 'Overlay-Protocol: true' -H 'Overlay-Id: a'
//!
//! # Build an identifier
//! overlay-probe encode profile-editor '{"id": 7}'
//!
//! # Take one apart
//! overlay-probe decode profile-editor:eyJpZCI6N30
//!
//! # With verbose logging
//! RUST_LOG=debug overlay-probe --url '/users?overlay=a'
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

use overlay_core::config::{default_config_path, load_config_from_path};
use overlay_core::identity::{decode, encode, OverlayArgs};
use overlay_core::server::{OverlayContext, OverlayRequest};

#[derive(Parser, Debug)]
#[command(name = "overlay-probe")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Request URL to inspect
    #[arg(short = 'u', long, value_name = "URL")]
    url: Option<String>,

    /// Request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "OVERLAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a typename and JSON arguments into an identifier
    Encode {
        /// Handler typename
        typename: String,
        /// JSON object of arguments
        args: Option<String>,
    },
    /// Decode an identifier into typename and arguments
    Decode {
        /// Overlay identifier
        id: String,
    },
}

fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("header {raw:?} is not `Name: value`"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn inspect(url: String, headers: &[String]) -> anyhow::Result<Value> {
    let mut request = OverlayRequest::get(url);
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        request.headers.insert(&name, value);
    }

    let ctx = OverlayContext::from_request(&request);
    Ok(json!({
        "context": ctx,
        "closeUrl": ctx.close_url(),
    }))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("overlay_probe=info".parse()?)
                .add_directive("overlay_core=warn".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let settings = load_config_from_path(args.config.clone().or_else(default_config_path))
        .context("Failed to load configuration")?;
    info!(
        source = %settings.source(),
        min_close = ?settings.client.min_close_duration,
        session_ttl = ?settings.server.session_ttl,
        "Configuration loaded"
    );

    let output = match args.command {
        Some(Command::Encode { typename, args }) => {
            let args: OverlayArgs = match args {
                Some(raw) => serde_json::from_str(&raw).context("Arguments must be a JSON object")?,
                None => OverlayArgs::new(),
            };
            json!({ "id": encode(&typename, &args)? })
        }
        Some(Command::Decode { id }) => {
            let (typename, args) = decode(&id)?;
            json!({ "typename": typename, "args": args })
        }
        None => {
            let Some(url) = args.url else {
                bail!("nothing to do: pass --url or a subcommand (see --help)");
            };
            inspect(url, &args.headers)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
