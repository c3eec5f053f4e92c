use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `maxstream-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file in the working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "maxstream-server",
    version,
    about = "A gRPC service that streams back the running maximum of the integers it receives"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value_t = String::from("127.0.0.1:50005"))]
    pub listen: String,

    /// Serve over TLS using `--cert` and `--key`.
    ///
    /// Environment variable: `TLS`
    #[arg(long, env = "TLS", default_value_t = false)]
    pub tls: bool,

    /// PEM certificate chain presented to clients in TLS mode.
    ///
    /// Environment variable: `SERVER_CERT`
    #[arg(long, env = "SERVER_CERT", default_value = "cert/server-cert.pem")]
    pub cert: PathBuf,

    /// PEM private key matching `--cert`.
    ///
    /// Environment variable: `SERVER_KEY`
    #[arg(long, env = "SERVER_KEY", default_value = "cert/server-key.pem")]
    pub key: PathBuf,

    /// Number of maxima buffered per session before the session waits for the
    /// client to read.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for live sessions to wind down on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub tls: Option<TlsPaths>,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        let tls = args.tls.then(|| TlsPaths {
            cert: args.cert,
            key: args.key,
        });

        Ok(Self {
            listen: args.listen,
            tls,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
