//! coapblock-ctl — send CoAP requests from the command line.
//!
//! Uploads larger than one datagram go out block-wise.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::AsyncReadExt;

use coapblock_client::{ClientError, CoapClient, ConnectivityBreaker, Payload, UdpTransport};
use coapblock_core::config::ClientConfig;
use coapblock_core::{ContentFormat, Response};

struct Options {
    confirmable: bool,
    config: Option<PathBuf>,
    format: ContentFormat,
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_response(resp: &Response) {
    println!("{}", resp.code);
    if resp.payload.is_empty() {
        return;
    }

    let json = resp.content_format == Some(ContentFormat::Json.into());
    match serde_json::from_slice::<serde_json::Value>(&resp.payload) {
        Ok(value) if json => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{}", resp.text()),
        },
        _ => println!("{}", resp.text()),
    }
}

async fn read_body(source: &str) -> Result<Bytes> {
    let data = if source == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("failed to read stdin")?;
        buf
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("failed to read {source}"))?
    };
    Ok(Bytes::from(data))
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_get(client: &CoapClient<UdpTransport>, url: &str) -> Result<(), ClientError> {
    let resp = client.get_json(url).await?;
    print_response(&resp);
    Ok(())
}

async fn cmd_upload(
    client: &CoapClient<UdpTransport>,
    method: &str,
    url: &str,
    body: Bytes,
    opts: &Options,
) -> Result<(), ClientError> {
    tracing::info!(url, bytes = body.len(), format = opts.format.mime(), "uploading");
    let payload = Payload::from(body);
    let resp = if method == "put" {
        client.put(url, payload, opts.format, opts.confirmable).await?
    } else {
        client.post(url, payload, opts.format, opts.confirmable).await?
    };
    print_response(&resp);
    Ok(())
}

fn report(result: Result<(), ClientError>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(ClientError::Rejected(resp)) => {
            eprintln!("Request rejected:");
            print_response(&resp);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Request failed: {e}");
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("Usage: coapblock-ctl [--non] [--config <path>] <command>");
    println!();
    println!("Commands:");
    println!("  get  <url>                 GET with Accept: application/json");
    println!("  post <url> <file|->        POST a file (or stdin)");
    println!("  put  <url> <file|->        PUT a file (or stdin)");
    println!();
    println!("Options:");
    println!("  --non              Send non-confirmable requests");
    println!("  --config <path>    Config file (default: $COAPBLOCK_CONFIG or ~/.config/coapblock/config.toml)");
    println!("  --format <name>    Upload content format: json, text, octet, cbor (default: octet)");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut opts = Options {
        confirmable: true,
        config: None,
        format: ContentFormat::OctetStream,
    };
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--non" => opts.confirmable = false,
            "--config" => {
                i += 1;
                opts.config = Some(args.get(i).context("--config requires a path")?.into());
            }
            "--format" => {
                i += 1;
                let name = args.get(i).context("--format requires a value")?;
                opts.format = ContentFormat::from_name(name)
                    .with_context(|| format!("unknown content format: {name}"))?;
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    if matches!(remaining.as_slice(), [] | ["help"] | ["--help"] | ["-h"]) {
        print_usage();
        return Ok(());
    }

    let config = match &opts.config {
        Some(path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    }
    .context("failed to load config")?;

    let breaker = Arc::new(ConnectivityBreaker::new(config.breaker.max_failures, |failures| {
        tracing::error!(failures, "too many transport failures, giving up");
        std::process::exit(1);
    }));
    let transport = UdpTransport::new(config.transport.clone()).with_breaker(breaker);
    let client = CoapClient::from_config(transport, &config).context("invalid config")?;

    match remaining.as_slice() {
        ["get", url] => report(cmd_get(&client, url).await),
        [method @ ("post" | "put"), url, source] => {
            let body = read_body(source).await?;
            report(cmd_upload(&client, method, url, body, &opts).await)
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
