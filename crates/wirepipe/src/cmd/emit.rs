use serde_json::Value;
use wirepipe_peer::dial;

use crate::cmd::EmitArgs;
use crate::exit::{pipe_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: EmitArgs, _format: OutputFormat) -> CliResult<i32> {
    let values: Vec<Value> = args.args.iter().map(|raw| parse_arg(raw)).collect();

    let pipe = dial(&args.addr).map_err(|err| pipe_error("dial failed", err))?;
    if args.linger {
        pipe.linger().map_err(|err| pipe_error("linger failed", err))?;
    }
    pipe.emit(&args.event, &values)
        .map_err(|err| pipe_error("emit failed", err))?;
    let _ = pipe.close();

    Ok(SUCCESS)
}

/// Arguments are JSON values; anything that does not parse is taken as a
/// bare string, so `--arg hello` and `--arg '"hello"'` agree.
fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}
