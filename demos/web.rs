use std::{sync::Arc, time::Duration};

use clap::Parser;
use parking_lot::Mutex;
use telemetry::{
    clock::SystemClock,
    config::{CollectorConfig, TierConfig},
    exporter::Exporter,
    registry::Registry,
    server,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
struct Args {
    /// Address the exporter listens on
    #[arg(long, env = "TELEMETRY_LISTEN", default_value = "0.0.0.0:5001")]
    listen: std::net::SocketAddr,
    /// History tier as `<width>:<count>`, finest first; repeat for more
    #[arg(long = "tier")]
    tiers: Vec<TierConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    let mut config = CollectorConfig {
        listen: args.listen,
        ..Default::default()
    };
    if !args.tiers.is_empty() {
        config.tiers = args.tiers;
    }
    let registry = Arc::new(Registry::new(Arc::new(SystemClock), config.tiers()?));

    // refreshed on every export rather than on a timer
    let cpu = Arc::new(registry.gauge("cpu"));
    let sys = Mutex::new(sysinfo::System::new());
    let _cpu_hook = {
        let cpu = Arc::downgrade(&cpu);
        registry.hook(move || {
            let Some(cpu) = cpu.upgrade() else {
                return Ok(());
            };
            let mut sys = sys.lock();
            sys.refresh_cpu_usage();
            cpu.set(sys.global_cpu_usage().round() as i64);
            Ok(())
        })
    };

    let ticks = registry.counter("ticks");
    let tick_time = registry.event("tick_time");
    std::thread::spawn(move || loop {
        let start = std::time::Instant::now();
        std::thread::sleep(Duration::from_millis(250));
        ticks.increment(1);
        tick_time.notify(start.elapsed());
    });

    println!("- classes: <http://127.0.0.1:{}/metric>", config.listen.port());
    println!(
        "- ticks: <http://127.0.0.1:{}/metric/counter/ticks>",
        config.listen.port()
    );
    println!(
        "- cpu: <http://127.0.0.1:{}/metric/gauge/cpu>",
        config.listen.port()
    );
    server::serve(config.listen, Exporter::new(registry)).await
}
