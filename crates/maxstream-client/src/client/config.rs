use anyhow::{anyhow, bail};
use clap::Parser;
use core::time::Duration;
use maxstream_core::tls::{self, Transport};
use std::path::PathBuf;
use tonic::codec::CompressionEncoding;

/// Runtime configuration for the `maxstream-client` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file in the working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "maxstream-client",
    version,
    about = "Streams integers to a maxstream server and reports the final maximum"
)]
pub struct CliArgs {
    /// Server to dial, as `host:port`.
    ///
    /// Environment variable: `SERVER_TARGET`
    #[arg(long, env = "SERVER_TARGET", default_value_t = String::from("localhost:50005"))]
    pub server: String,

    /// Dial over TLS, trusting the CA in `--cert`.
    ///
    /// Environment variable: `TLS`
    #[arg(long, env = "TLS", default_value_t = false)]
    pub tls: bool,

    /// Skip server certificate verification. Requires `--tls`; meant for
    /// self-signed test deployments.
    ///
    /// Environment variable: `INSECURE`
    #[arg(long, env = "INSECURE", default_value_t = false)]
    pub insecure: bool,

    /// PEM file with the CA certificate(s) that signed the server certificate.
    ///
    /// Environment variable: `CA_CERT`
    #[arg(long, env = "CA_CERT", default_value = "cert/ca-cert.pem")]
    pub cert: PathBuf,

    /// Name the server certificate must match. Defaults to the host part of
    /// `--server`.
    ///
    /// Environment variable: `TLS_DOMAIN`
    #[arg(long, env = "TLS_DOMAIN")]
    pub domain: Option<String>,

    /// Number of values to send.
    ///
    /// Environment variable: `COUNT`
    #[arg(long, env = "COUNT", default_value_t = 10)]
    pub count: u32,

    /// Pause after each value, in milliseconds.
    ///
    /// Environment variable: `DELAY_MS`
    #[arg(long, env = "DELAY_MS", default_value_t = 200)]
    pub delay_ms: u64,

    /// Give up on the session after this many milliseconds.
    ///
    /// Environment variable: `TIMEOUT_MS`
    #[arg(long, env = "TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Compression for outgoing messages: `none`, `gzip`, `deflate` or `zstd`.
    ///
    /// Environment variable: `COMPRESSION`
    #[arg(long, env = "COMPRESSION", default_value_t = String::from("none"))]
    pub compression: String,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    pub transport: Transport,
    pub count: u32,
    pub delay: Duration,
    pub deadline: Option<Duration>,
    pub compression: Option<CompressionEncoding>,
}

impl TryFrom<CliArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.count == 0 {
            bail!("COUNT must be greater than 0");
        }

        if args.insecure && !args.tls {
            bail!("INSECURE only applies to TLS connections; pass --tls as well");
        }

        let compression = parse_compression(&args.compression)?;

        let domain = args
            .domain
            .unwrap_or_else(|| tls::server_name_of(&args.server).to_owned());

        let transport = match (args.tls, args.insecure) {
            (false, _) => Transport::Plain,
            (true, true) => Transport::TlsInsecure {
                server_name: domain,
            },
            (true, false) => Transport::Tls(tls::client_tls(&args.cert, &domain)?),
        };

        Ok(Self {
            server: args.server,
            transport,
            count: args.count,
            delay: Duration::from_millis(args.delay_ms),
            deadline: args.timeout_ms.map(Duration::from_millis),
            compression,
        })
    }
}

fn parse_compression(raw: &str) -> anyhow::Result<Option<CompressionEncoding>> {
    match raw.to_ascii_lowercase().as_str() {
        "none" => Ok(None),
        "gzip" => Ok(Some(CompressionEncoding::Gzip)),
        "deflate" => Ok(Some(CompressionEncoding::Deflate)),
        "zstd" => Ok(Some(CompressionEncoding::Zstd)),
        other => Err(anyhow!("unknown compression {other:?}")),
    }
}
