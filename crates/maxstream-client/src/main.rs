use anyhow::Context;
use clap::Parser;
use maxstream_client::client::config::{CliArgs, ClientConfig};
use maxstream_client::client::initiator::{self, SessionOptions, Termination};
use maxstream_client::client::telemetry::init_logging;
use maxstream_core::{proto::math_client::MathClient, tls};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    init_logging();

    if let Err(e) = run(args).await {
        tracing::error!("{e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = ClientConfig::try_from(args)?;
    tracing::info!(
        "Dialing {} ({} values, {:?} apart)",
        config.server,
        config.count,
        config.delay
    );

    let channel = tls::connect(&config.server, config.transport.clone())
        .await
        .context("cannot dial server")?;

    let mut client = MathClient::new(channel);
    if let Some(encoding) = config.compression {
        client = client
            .send_compressed(encoding)
            .accept_compressed(encoding);
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let options = SessionOptions {
        delay: config.delay,
        deadline: config.deadline,
    };
    let report = match initiator::run(&mut client, config.count, options, cancel).await {
        Ok(report) => report,
        Err(failure) => {
            tracing::warn!(
                "finished with max={} after {} values",
                failure.observed_max,
                failure.values_sent
            );
            return Err(failure.into());
        }
    };

    match report.termination {
        Termination::EndOfStream => tracing::info!(
            "finished with max={} after {} values",
            report.observed_max,
            report.values_sent
        ),
        Termination::Cancelled => tracing::info!(
            "cancelled with max={} after {} values",
            report.observed_max,
            report.values_sent
        ),
    }
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal, cancelling session");
            cancel.cancel();
        }
        Err(e) => tracing::error!("failed to install Ctrl+C handler: {e}"),
    }
}
