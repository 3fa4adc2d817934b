//! Weatherset content producer executable: pushes one source file's reading
//! to an aggregation node.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::runtime::Builder;
use weatherset::{
    logger_init, pf_error, pf_info, pf_warn, source_to_payload, ServiceStub,
    TargetAddr, WeathersetError, ME,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Aggregation node target URL ([scheme://]host:port).
    target: String,

    /// Path to the local 'key: value' lines source file.
    source: PathBuf,

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

        let target: TargetAddr = self.target.parse()?;
        if target.station_id.is_some() {
            return Err(WeathersetError::msg(
                "producer target URL must not carry a station ID query",
            ));
        }
        Ok(target)
    }
}

/// Actual main function of the content producer.
fn producer_main() -> Result<(), WeathersetError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let target = args.sanitize()?;

    // render the source file into a wire payload before touching the network
    let payload = source_to_payload(&args.source)?;

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-producer")
        .build()?;

    // enter tokio runtime and push the reading
    runtime.block_on(async move {
        let mut stub = ServiceStub::new(target);
        let reply = stub.put_record(&payload).await?;

        match reply.status {
            200 | 201 | 204 => {
                pf_info!(
                    "PUT replied status {} lamport {:?}",
                    reply.status,
                    reply.lamport
                );
            }
            _ => {
                pf_warn!("PUT rejected with status {}", reply.status);
            }
        }

        Ok::<(), WeathersetError>(())
    })?;

    Ok(())
}

/// Main function of the content producer executable.
fn main() -> ExitCode {
    logger_init();
    let _ = ME.set("producer".into());

    if let Err(ref e) = producer_main() {
        pf_error!("producer_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
