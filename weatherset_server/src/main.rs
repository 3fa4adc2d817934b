//! Weatherset aggregation node executable.

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use clap::Parser;
use log::{self, LevelFilter};
use tokio::runtime::Builder;
use weatherset::{
    logger_init, parsed_config, pf_error, AggregationConfig, AggregationNode,
    WeathersetError, ME,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Client-facing API port.
    /// This port must be available at process launch.
    #[arg(default_value_t = 4567)]
    port: u16,

    /// Local IP to use for binding the listening socket.
    #[arg(short, long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    bind_ip: Ipv4Addr,

    /// Node configuration TOML string (use '+' in place of newlines).
    #[arg(short, long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(())` on success or
    /// `Err(WeathersetError)` on any error.
    fn sanitize(&self) -> Result<(), WeathersetError> {
        if self.port <= 1024 {
            Err(WeathersetError::msg(format!("invalid port {}", self.port)))
        } else if self.threads < 2 {
            Err(WeathersetError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            Ok(())
        }
    }
}

/// Actual main function of the aggregation node.
fn node_main() -> Result<(), WeathersetError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    args.sanitize()?;

    // parse optional config string if given
    let config_str = if args.config.is_empty() {
        None
    } else {
        args.config = args.config.replace('+', "\n");
        Some(&args.config[..])
    };
    let config = parsed_config!(config_str => AggregationConfig;
                                ttl_ms, capacity, tick_interval_ms,
                                backup_path)?;

    // parse client-facing API address
    let api_addr: SocketAddr = format!("{}:{}", args.bind_ip, args.port)
        .parse()
        .map_err(|e| {
            WeathersetError::msg(format!(
                "failed to parse api_addr: bind_ip {} port {}: {}",
                args.bind_ip, args.port, e
            ))
        })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-node")
            .build()?;

        // enter tokio runtime, set up the aggregation node, and start the
        // accept loop logic
        runtime.block_on(async move {
            let mut node = AggregationNode::new(config)?;
            node.setup(api_addr).await?;

            node.run().await?;

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), WeathersetError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the aggregation node executable.
fn main() -> ExitCode {
    logger_init();
    let _ = ME.set("node".into());

    if let Err(ref e) = node_main() {
        pf_error!("node_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
