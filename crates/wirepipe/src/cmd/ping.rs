use std::time::Duration;

use wirepipe_peer::dial;

use crate::cmd::PingArgs;
use crate::exit::{pipe_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let pipe = dial(&args.addr).map_err(|err| pipe_error("dial failed", err))?;
    let handle = pipe.ping().map_err(|err| pipe_error("ping failed", err))?;
    let rtt = handle
        .recv_timeout(Duration::from_millis(args.timeout_ms))
        .map_err(|err| pipe_error("no pong", err))?;
    let _ = pipe.close();

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "addr": args.addr, "rtt_us": rtt.as_micros() as u64 })
        ),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("rtt to {}: {rtt:?}", args.addr);
        }
    }

    Ok(SUCCESS)
}
