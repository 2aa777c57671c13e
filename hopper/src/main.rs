//! # Hopper CLI Entry Point
//!
//! The main executable for the Hopper tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs the
//!    `tracing` subscriber (`RUST_LOG` controls verbosity, `info` by default).
//! 2. **Configuration**: Loads the client options from `--config` and applies the flag overrides.
//! 3. **Execution**: Delegates the request processing to the `HopperClient`.
//! 4. **Presentation**: Formats and prints the resulting data or error status to standard output/error.

mod cli;
mod formatter;

use anyhow::Context;
use clap::Parser;
use cli::{CallArgs, Cli, Commands};
use formatter::{FormattedString, ServiceList};
use hopper_core::{
    client::{ClientOptions, DynamicRequest, DynamicResponse, HopperClient},
    prost_reflect::DescriptorPool,
};
use std::{path::Path, process};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let descriptor = match std::fs::read(&args.file_descriptor_set).with_context(|| {
        format!(
            "Failed to read the descriptor set '{}'",
            args.file_descriptor_set.display()
        )
    }) {
        Ok(bytes) => bytes,
        Err(err) => exit_with(err),
    };

    match args.command {
        Commands::Call(call) => run_call(call, &descriptor).await,
        Commands::List { service } => list(&descriptor, service.as_deref()),
    }
}

fn exit_with(err: impl Into<FormattedString>) -> ! {
    eprintln!("{}", err.into());
    process::exit(1);
}

fn list(descriptor: &[u8], service: Option<&str>) {
    let pool = match DescriptorPool::decode(descriptor) {
        Ok(pool) => pool,
        Err(err) => exit_with(err),
    };

    match service {
        None => {
            let services = pool.services().collect();
            println!("{}", FormattedString::from(ServiceList(services)));
        }
        Some(name) => match pool.get_service_by_name(name) {
            Some(service) => println!("{}", FormattedString::from(service)),
            None => exit_with(anyhow::anyhow!("Service '{name}' not found")),
        },
    }
}

async fn run_call(args: CallArgs, descriptor: &[u8]) {
    let options = match load_options(&args) {
        Ok(options) => options,
        Err(err) => exit_with(err),
    };

    let client = match HopperClient::connect(args.instances, descriptor, options) {
        Ok(client) => client,
        Err(err) => exit_with(err),
    };

    let (service, method) = args.endpoint;
    let request = DynamicRequest {
        body: args.body,
        headers: args.headers,
        service,
        method,
        call_kind: args.call_kind,
        timeout: args.timeout,
        ..Default::default()
    };

    match client.call(request).await {
        Ok(DynamicResponse::Unary(value)) => println!("{}", FormattedString::from(value)),
        Ok(DynamicResponse::Streaming(values)) => print_stream(values),
        Err(err) => exit_with(err),
    }
}

/// Reads the options file, if any, then applies the command-line overrides.
fn load_options(args: &CallArgs) -> anyhow::Result<ClientOptions> {
    let mut options = match &args.config {
        Some(path) => read_options(path)?,
        None => ClientOptions::default(),
    };

    let defaults = &mut options.default_request_options;
    if let Some(retries) = args.max_auto_retries {
        defaults.max_auto_retries = retries;
    }
    if let Some(retries) = args.max_auto_retries_next_server {
        defaults.max_auto_retries_next_server = retries;
    }
    if let Some(serializer) = &args.serializer {
        defaults.serializer_name = Some(serializer.clone());
    }

    tracing::debug!(?options, "client options loaded");
    Ok(options)
}

fn read_options(path: &Path) -> anyhow::Result<ClientOptions> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read the config file '{}'", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config file '{}'", path.display()))
}

fn print_stream(stream: Vec<Result<serde_json::Value, hopper_core::tonic::Status>>) {
    for elem in stream {
        match elem {
            Ok(val) => println!("{}", FormattedString::from(val)),
            Err(status) => println!("{}", FormattedString::from(status)),
        }
    }
}
