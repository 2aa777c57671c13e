//! # CLI
//!
//! This module defines the command-line interface of `hopper` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers are `key:value`);
use clap::{Args, Parser, Subcommand};
use hopper_core::client::ServiceInstance;
use std::{path::PathBuf, time::Duration};

#[derive(Parser)]
#[command(name = "hopper", version, about = "Dynamic gRPC CLI with retries across instances")]
pub struct Cli {
    /// Path to the descriptor set (.bin) describing the target services
    #[arg(long, global = true, default_value = "descriptor.bin")]
    pub file_descriptor_set: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Perform a gRPC call, retrying across the given service instances
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// hopper call my.pkg.Service/Method --instance http://localhost:50051 \
    ///     --instance http://localhost:50052 --max-auto-retries 2 --body '{"key": "value"}'
    /// ```
    Call(CallArgs),

    /// List the services of the descriptor set, or the methods of one service
    List {
        /// Fully qualified service name (e.g. my.package.Service)
        service: Option<String>,
    },
}

#[derive(Args)]
pub struct CallArgs {
    /// Endpoint (package.Service/Method)
    #[arg(value_parser = parse_endpoint)]
    pub endpoint: (String, String),

    /// JSON body (Object for Unary, Array for Streaming)
    #[arg(long, value_parser = parse_body)]
    pub body: serde_json::Value,

    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Service instance to balance over (e.g. http://localhost:50051); repeatable
    #[arg(short, long = "instance", required = true)]
    pub instances: Vec<ServiceInstance>,

    /// JSON file with client options (`default_request_options`)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Extra attempts against the same instance
    #[arg(long)]
    pub max_auto_retries: Option<i32>,

    /// Extra instances to try once the attempts on one instance are exhausted
    #[arg(long)]
    pub max_auto_retries_next_server: Option<i32>,

    /// Serializer of the payloads (`json` or `grpc-json`)
    #[arg(long)]
    pub serializer: Option<String>,

    /// Call kind to use instead of the method's default (e.g. `blocking_unary`)
    #[arg(long)]
    pub call_kind: Option<String>,

    /// Deadline of each attempt, in milliseconds
    #[arg(long = "timeout-ms", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,
}

fn parse_endpoint(value: &str) -> Result<(String, String), String> {
    let (service, method) = value.split_once('/').ok_or_else(|| {
        format!("Invalid endpoint format: '{value}'. Expected 'package.Service/Method'",)
    })?;

    if service.trim().is_empty() || method.trim().is_empty() {
        return Err("Service and Method names cannot be empty".to_string());
    }

    Ok((service.to_string(), method.to_string()))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_body(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    value
        .parse()
        .map(Duration::from_millis)
        .map_err(|e| format!("Invalid timeout: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_requires_service_and_method() {
        assert_eq!(
            parse_endpoint("echo.EchoService/UnaryEcho").unwrap(),
            ("echo.EchoService".to_string(), "UnaryEcho".to_string())
        );
        assert!(parse_endpoint("echo.EchoService").is_err());
        assert!(parse_endpoint("/UnaryEcho").is_err());
    }

    #[test]
    fn headers_are_trimmed() {
        assert_eq!(
            parse_header("x-trace : abc").unwrap(),
            ("x-trace".to_string(), "abc".to_string())
        );
        assert!(parse_header("no-separator").is_err());
    }

    #[test]
    fn call_arguments_parse() {
        let cli = Cli::try_parse_from([
            "hopper",
            "--file-descriptor-set",
            "echo.bin",
            "call",
            "echo.EchoService/UnaryEcho",
            "--body",
            r#"{"message":"hi"}"#,
            "-i",
            "http://a:1",
            "-i",
            "http://b:1",
            "--max-auto-retries",
            "2",
            "--timeout-ms",
            "1500",
        ])
        .unwrap();

        let Commands::Call(args) = cli.command else {
            panic!("expected the call command");
        };
        assert_eq!(args.instances.len(), 2);
        assert_eq!(args.max_auto_retries, Some(2));
        assert_eq!(args.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(cli.file_descriptor_set, PathBuf::from("echo.bin"));
    }

    #[test]
    fn call_requires_an_instance() {
        let result = Cli::try_parse_from([
            "hopper",
            "call",
            "echo.EchoService/UnaryEcho",
            "--body",
            "{}",
        ]);
        assert!(result.is_err());
    }
}
