//!
//! campusgate server binary
//! ------------------------
//! Command-line entry point for the portal HTTP service. Supports
//! configuration via CLI flags and environment variables.

use anyhow::Result;
use std::env;
use std::str::FromStr;

use campusgate::identity::RoleBackend;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn parse_port_env(name: &str) -> Option<u16> {
    match env::var(name) {
        Ok(val) => val.parse::<u16>().ok(),
        Err(_) => None,
    }
}

fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("campusgate Server\n\nUSAGE:\n  campusgate [--http-port N] [--data-root PATH] [--role-backend table|document]\n\nOPTIONS:\n  --http-port N            HTTP API port (env: CAMPUSGATE_HTTP_PORT, default 7880)\n  --data-root PATH         Data root folder (env: CAMPUSGATE_DATA_ROOT, default data)\n  --role-backend NAME      Role store backend (env: CAMPUSGATE_ROLE_BACKEND, default table)\n");
        return Ok(());
    }

    // Defaults
    let default_http: u16 = 7880;
    let default_root: &str = "data";

    // Environment variables; CLI arguments override
    let env_http = parse_port_env("CAMPUSGATE_HTTP_PORT");
    let env_root = env::var("CAMPUSGATE_DATA_ROOT").ok();
    let env_backend = env::var("CAMPUSGATE_ROLE_BACKEND").ok();

    let arg_http = parse_arg(&args, "--http-port").and_then(|s| s.parse::<u16>().ok());
    let arg_root = parse_arg(&args, "--data-root");
    let arg_backend = parse_arg(&args, "--role-backend");

    let http_port = arg_http.or(env_http).unwrap_or(default_http);
    let data_root = arg_root.or(env_root).unwrap_or_else(|| default_root.to_string());
    let backend = match arg_backend.or(env_backend) {
        Some(name) => RoleBackend::from_str(&name)?,
        None => RoleBackend::Table,
    };

    info!(
        target: "campusgate",
        "campusgate starting: http_port={}, data_root='{}', role_backend={:?}",
        http_port, data_root, backend
    );

    campusgate::server::run_with_port(http_port, &data_root, backend).await
}
