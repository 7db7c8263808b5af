use std::io::{self, BufRead};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use webserve::config::{log_directive, Args, ServerConfig};
use webserve::port::{find_free_port, DEFAULT_PORT_RANGE};
use webserve::{Server, VERSION};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_directive(args.verbose)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🚀 Launching webserve v{VERSION}...");

    // -----------------------------
    // Port
    // -----------------------------
    let port = match args.port {
        Some(port) => port,
        None => {
            println!("🔎 Looking for a port to bind to. Avoid this with --port PORT.");
            match find_free_port(DEFAULT_PORT_RANGE) {
                Some(port) => {
                    println!("📌 Selected port {port}.");
                    port
                }
                None => {
                    eprintln!("❌ Failed to find a port to run the server. Please use --port PORT.");
                    return Ok(());
                }
            }
        }
    };

    // -----------------------------
    // Model + server
    // -----------------------------
    println!("📦 Loading model {}...", args.model);
    let config = ServerConfig::from(&args);
    let server = Arc::new(Server::new(config)?);
    println!("✅ Engine ready.");

    server.listen(&args.host, port, true)?;

    println!("🌐 Server ready.\n");
    println!("   Model:          {}", args.model);
    println!("   Temperature:    {}", args.temperature);
    println!("   Context length: {} tok.", args.context);
    println!("   Max new tokens: {} tok.", args.max_tokens);
    println!("   GPU count:      {}", args.gpu_count);
    println!("   LaTeX:          {}", if args.latex { "ON" } else { "OFF" });
    println!("   Listening on HTTP port {port}.");
    println!("   http://localhost:{port}/\n");
    println!("Type 'exit' to close server.");

    wait_for_exit(io::stdin().lock())?;
    Ok(())
}

/// Blocks until a line reading exactly `exit` (or end of input).
fn wait_for_exit(input: impl BufRead) -> io::Result<()> {
    for line in input.lines() {
        if line? == "exit" {
            break;
        }
    }
    Ok(())
}
