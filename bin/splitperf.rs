use clap::Parser;
use splitpt::{
    AdapterConfig, Dialer, PacketConn, SessionId, SessionListener, SplitAlgorithm, TcpDialer,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::filter::EnvFilter;

type BoxResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Accumulates byte counts and prints the throughput once per period.
struct Meter {
    name: String,
    period: Duration,
    start: Instant,
    bytes: usize,
    packets: usize,
}

impl Meter {
    fn new(name: impl Into<String>, period: Duration) -> Meter {
        Meter {
            name: name.into(),
            period,
            start: Instant::now(),
            bytes: 0,
            packets: 0,
        }
    }

    fn record(&mut self, n: usize) {
        self.bytes += n;
        self.packets += 1;
        let delta = self.start.elapsed();
        if delta >= self.period {
            let throughput =
                ((self.bytes * 8) as f32 / delta.as_secs_f32()) / (10u64.pow(6) as f32);
            println!("[{}]: {throughput} Mbps, {} packets", self.name, self.packets);
            self.start = Instant::now();
            self.bytes = 0;
            self.packets = 0;
        }
    }
}

fn run_client_mode(args: Args, config: AdapterConfig) -> BoxResult<()> {
    let mut dialers: Vec<Box<dyn Dialer>> = Vec::with_capacity(args.bond as usize);
    for _ in 0..args.bond {
        dialers.push(Box::new(TcpDialer::resolve(args.addr.as_str())?.with_nodelay(true)));
    }
    let session_id = SessionId::new();
    let conn: Arc<dyn PacketConn> =
        splitpt::dial_packet_conn(&config, session_id, dialers)?.into();
    println!("Session {session_id} over {} stream(s) to {}", args.bond, args.addr);

    let reader = {
        let conn = Arc::clone(&conn);
        let mut meter = Meter::new("echo", Duration::from_secs(args.period));
        let mut buf = vec![0u8; args.size];
        std::thread::Builder::new()
            .name("splitperf-echo".into())
            .spawn(move || {
                while let Ok((n, _)) = conn.recv_from(&mut buf) {
                    meter.record(n);
                }
            })?
    };

    let mut buf = vec![0u8; args.size];
    buf.fill(42);
    let to = conn.local_addr();
    let gap = Duration::from_micros(args.gap_us);
    loop {
        if let Err(e) = conn.send_to(&buf, &to) {
            println!("Connection closed: {e}");
            break;
        }
        if !gap.is_zero() {
            std::thread::sleep(gap);
        }
    }
    let _ = reader.join();
    Ok(())
}

fn run_server_mode(args: Args, config: AdapterConfig) -> BoxResult<()> {
    let listener = SessionListener::bind(args.addr.as_str(), &config)?;
    println!("Listening on {}", listener.local_addr()?);
    let conn = listener.packet_conn();
    std::thread::Builder::new()
        .name("splitperf-accept".into())
        .spawn(move || {
            if let Err(e) = listener.serve() {
                println!("Listener failed: {e}");
            }
        })?;

    let mut meter = Meter::new("recv", Duration::from_secs(args.period));
    let mut buf = vec![0u8; args.size];
    loop {
        let (n, from) = conn.recv_from(&mut buf)?;
        meter.record(n);
        if args.echo {
            conn.send_to(&buf[..n], &from)?;
        }
    }
}

fn init_env_filter(env_filter: EnvFilter) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_level(true)
        .with_target(true);

    let subscriber = subscriber.finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> BoxResult<()> {
    tracing_log::LogTracer::init()?;

    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        init_env_filter(env_filter);
    }

    let args = Args::parse();
    let max = splitpt::framing::MAX_PACKET_SIZE;
    if args.size == 0 || args.size > max {
        return Err(format!("packet size must be in 1..={max}").into());
    }
    let config = AdapterConfig::default()
        .with_redial_delay(Duration::from_millis(args.redial_ms))
        .with_idle_timeout(Duration::from_secs(args.idle_secs))
        .with_split(args.split);
    config.validate()?;

    if args.client {
        run_client_mode(args, config)
    } else {
        run_server_mode(args, config)
    }
}

/// Throughput benchmark for splitpt packet connections
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Set the client mode for the application
    #[arg(short, long)]
    client: bool,
    /// The address <ip:port> to listen or connect, depending on the mode.
    #[arg(short, long)]
    addr: String,
    /// The packet size
    #[arg(short, long, default_value = "1400")]
    size: usize,
    /// The number of streams to split packets over (client)
    #[arg(short, long, default_value = "3")]
    bond: u8,
    /// The sampling period in seconds
    #[arg(short, long, default_value = "1")]
    period: u64,
    /// How packets are assigned to streams (client)
    #[arg(long, value_enum, default_value_t = SplitAlgorithm::RoundRobin)]
    split: SplitAlgorithm,
    /// Milliseconds to wait before redialing a broken stream
    #[arg(long, default_value = "1000")]
    redial_ms: u64,
    /// Seconds an idle session is remembered (server)
    #[arg(long, default_value = "60")]
    idle_secs: u64,
    /// Pause between two sent packets, in microseconds (client)
    #[arg(long, default_value = "100")]
    gap_us: u64,
    /// Echo every received packet back to its session (server)
    #[arg(short, long)]
    echo: bool,
}
