//! sandboxd - sandbox service entry point.
//!
//! - `sandboxd serve`: IPC (msgpack/TCP) and HTTP listeners over one sandbox
//! - `sandboxd exec`: one request on stdin, one result on stdout
//! - `sandboxd validate [FILE]`: syntax check of a script file or stdin

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use code_sandbox::ipc::IpcServer;
use code_sandbox::{http, observability, stdio, Config, Sandbox};
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the IPC and HTTP listeners
    Serve {
        /// IPC bind address
        #[arg(long, env = "SANDBOX_LISTEN_ADDR")]
        listen: Option<String>,
        /// HTTP bind address
        #[arg(long, env = "SANDBOX_HTTP_ADDR")]
        http: Option<String>,
        /// Disable the HTTP listener
        #[arg(long)]
        no_http: bool,
    },
    /// Execute one JSON request read from stdin
    Exec,
    /// Validate a script without running it
    Validate {
        /// Script file (stdin when omitted)
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    observability::init_tracing_with(&config.observability);

    match cli.command {
        Command::Serve {
            listen,
            http: http_addr,
            no_http,
        } => {
            if let Some(addr) = listen {
                config.server.listen_addr = addr;
            }
            if let Some(addr) = http_addr {
                config.http.listen_addr = addr;
            }
            serve(config, !no_http).await?;
        }
        Command::Exec => {
            let sandbox = Sandbox::from_config(&config);
            stdio::exec(&sandbox, &mut tokio::io::stdin(), &mut tokio::io::stdout()).await?;
        }
        Command::Validate { file } => {
            let sandbox = Sandbox::from_config(&config);
            let mut out = tokio::io::stdout();
            let result = match file {
                Some(path) => {
                    let mut source = tokio::fs::File::open(path).await?;
                    stdio::validate(&sandbox, &mut source, &mut out).await?
                }
                None => stdio::validate(&sandbox, &mut tokio::io::stdin(), &mut out).await?,
            };
            if !result.valid {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

async fn serve(config: Config, with_http: bool) -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = Sandbox::from_config(&config);
    tracing::info!(
        "sandbox_starting: mode={:?}, timeout={:?}, max_concurrent={}",
        sandbox.mode(),
        config.limits.timeout,
        config.limits.max_concurrent,
    );

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let ipc = IpcServer::new(sandbox.clone(), addr, config.ipc.clone());
    let cancel = ipc.cancel_token();

    let http_task = if with_http {
        let listener = TcpListener::bind(&config.http.listen_addr).await?;
        let sandbox = sandbox.clone();
        let http_config = config.http.clone();
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            http::serve(listener, sandbox, &http_config, cancel).await
        }))
    } else {
        None
    };

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown_requested");
        }
        shutdown.cancel();
    });

    ipc.serve().await?;
    if let Some(task) = http_task {
        task.await??;
    }
    Ok(())
}
