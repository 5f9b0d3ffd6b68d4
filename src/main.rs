use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use driverlink::driver::Driver;
use driverlink::error::RpcError;
use driverlink::logging::{self, LogSink};
use driverlink::protocol::Payload;
use tracing::{error, info};

/// Reference driver: echoes rpc payloads and command data back to the daemon.
///
/// `delay` echoes its payload, a number of milliseconds, after sleeping that long.
#[derive(Parser, Debug)]
#[command(name = "echo-driver", version, about)]
struct Cli {
    /// Service name assigned by the daemon
    service: String,

    /// Extra arguments from the driver description
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    extra: Vec<String>,
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "driver terminated");
            eprintln!("echo-driver: {e:#}");
            1
        }
    };
    // stdin is read on a blocking thread that would keep the runtime alive
    std::process::exit(code);
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let control = logging::init("echo", logging::DEFAULT_LEVEL, LogSink::detect())
        .context("Failed to set up logging")?;
    info!(service = %cli.service, extra = ?cli.extra, "echo driver starting");

    let driver = Driver::builder(cli.service, "echo")
        .log_control(control)
        .rpc("echo", |_, request| async move { Ok(Payload::from_bytes(request.payload)) })
        .rpc("delay", |_, request| async move {
            let millis: u64 = request.json()?;
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, RpcError>(Payload::from_bytes(request.payload))
        })
        .rpc("fail", |_, request| async move {
            Err(RpcError::Handler(format!("{} always fails", request.method)))
        })
        .command("echo", |_, call| async move { Ok(call.request.data) })
        .build_stdio();

    driver.run().await.context("Driver stopped without a stop request")
}
