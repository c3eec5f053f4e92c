use core::{fmt, hint::black_box};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::stream::{FuturesUnordered, StreamExt};
use maxstream_core::proto::{ValueMessage, math_client::MathClient};
use std::{
    net::TcpStream,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};
use tokio::runtime::Builder;
use tonic::transport::{Channel, Uri};

const LISTEN_ADDR: &str = "127.0.0.1:50055";

/// Shape of the values sent in one session.
#[derive(Clone, Copy, Debug)]
enum Pattern {
    /// Every value is a new maximum, so every value is answered.
    Ascending,
    /// Only the first value is answered.
    Flat,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Ascending => write!(f, "ascending"),
            Pattern::Flat => write!(f, "flat"),
        }
    }
}

impl Pattern {
    fn value(self, i: i32) -> i32 {
        match self {
            Pattern::Ascending => i,
            Pattern::Flat => 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct SessionBenchParams {
    values_per_session: i32,
    concurrency: usize,
    pattern: Pattern,
}

fn max_bench(c: &mut Criterion) {
    let uri = Uri::try_from(format!("http://{LISTEN_ADDR}")).expect("Invalid URI");
    // Start the server. This may require a full compilation so set the timeout
    // high.
    let mut server = Command::new("cargo")
        .args([
            "run",
            "--bin",
            "maxstream-server",
            "--release",
            "--",
            "--listen",
            LISTEN_ADDR,
        ])
        .env("RUST_LOG", "warn")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("Failed to start maxstream-server");
    wait_for_port(LISTEN_ADDR, 300);

    let mut cases = Vec::new();
    for values_per_session in [100, 10_000] {
        for concurrency in [1, 8, 64] {
            for pattern in [Pattern::Ascending, Pattern::Flat] {
                cases.push(SessionBenchParams {
                    values_per_session,
                    concurrency,
                    pattern,
                });
            }
        }
    }
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();

    for params in &cases {
        let mut group = c.benchmark_group("grpc/max");
        group.throughput(Throughput::Elements(
            params.values_per_session as u64 * params.concurrency as u64,
        ));

        group.bench_function(
            format!(
                "values/{}/conc/{}/pattern/{}",
                params.values_per_session, params.concurrency, params.pattern,
            ),
            |b| {
                b.to_async(&rt).iter_custom(|iters| {
                    let uri = uri.clone();
                    async move {
                        let channel = Channel::builder(uri)
                            .connect()
                            .await
                            .expect("Failed to connect to server");

                        let start = Instant::now();
                        for _ in 0..iters {
                            run_sessions(&channel, params).await;
                        }
                        start.elapsed()
                    }
                });
            },
        );

        group.finish();
    }

    if server.kill().is_err() {
        eprintln!("failed to kill server");
    }
}

async fn run_sessions(channel: &Channel, params: &SessionBenchParams) {
    let mut tasks = FuturesUnordered::new();

    for _ in 0..params.concurrency {
        let mut client = MathClient::new(channel.clone());
        let params = *params;

        tasks.push(tokio::spawn(async move {
            let outbound = futures::stream::iter(
                (0..params.values_per_session).map(move |i| ValueMessage {
                    num: params.pattern.value(i),
                }),
            );
            let mut inbound = client
                .max(outbound)
                .await
                .expect("max call failed")
                .into_inner();

            let mut last = None;
            while let Some(resp) = inbound.next().await {
                last = Some(resp.expect("resp").result);
            }
            black_box(last);
        }));
    }

    while let Some(res) = tasks.next().await {
        res.unwrap();
    }
}

pub fn wait_for_port(addr: &str, timeout_secs: u64) {
    let start = Instant::now();
    while start.elapsed().as_secs() < timeout_secs {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Server did not start listening on {}", addr);
}

criterion_group!(grpc_benches, max_bench);
criterion_main!(grpc_benches);
