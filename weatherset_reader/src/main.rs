//! Weatherset reading client executable: pulls aggregated readings from an
//! aggregation node and prints them to stdout.

use std::process::ExitCode;

use clap::Parser;
use tokio::runtime::Builder;
use weatherset::{
    logger_init, pf_error, pf_info, pf_warn, ServiceStub, TargetAddr,
    WeathersetError, ME,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Aggregation node target URL
    /// ([scheme://]host:port[?id=<station>]).
    target: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(target)` on success or
    /// `Err(WeathersetError)` on any error.
    fn sanitize(&self) -> Result<TargetAddr, WeathersetError> {
        if self.threads < 2 {
            return Err(WeathersetError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )));
        }
        self.target.parse()
    }
}

/// Actual main function of the reading client.
fn reader_main() -> Result<(), WeathersetError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let target = args.sanitize()?;

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-reader")
        .build()?;

    // enter tokio runtime and pull the readings
    runtime.block_on(async move {
        let mut stub = ServiceStub::new(target);
        let reply = stub.get_records().await?;

        if reply.status == 200 {
            pf_info!(
                "GET replied status {} lamport {:?}",
                reply.status,
                reply.lamport
            );
            print!("{}", reply.body);
        } else {
            pf_warn!("GET rejected with status {}", reply.status);
        }

        Ok::<(), WeathersetError>(())
    })?;

    Ok(())
}

/// Main function of the reading client executable.
fn main() -> ExitCode {
    logger_init();
    let _ = ME.set("reader".into());

    if let Err(ref e) = reader_main() {
        pf_error!("reader_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
