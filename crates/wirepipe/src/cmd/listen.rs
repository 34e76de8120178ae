use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use wirepipe_frame::frame_type;
use wirepipe_peer::PipeListener;

use crate::cmd::ListenArgs;
use crate::exit::{pipe_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_event, print_frame, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    if args.events.is_empty() && !args.raw {
        return Err(CliError::new(
            USAGE,
            "nothing to print: pass --event KEY and/or --raw",
        ));
    }

    let listener =
        PipeListener::bind(&args.addr).map_err(|err| pipe_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;
    let printed = Arc::new(AtomicUsize::new(0));

    for key in &args.events {
        let event = key.clone();
        let printed = Arc::clone(&printed);
        listener.on(key, move |sender, event_args| {
            print_event(&event, sender, event_args, format);
            printed.fetch_add(1, Ordering::SeqCst);
        });
    }

    if args.raw {
        let printed = Arc::clone(&printed);
        listener.subscribe(move |pipe| {
            let printed = Arc::clone(&printed);
            pipe.subscribe(move |sender, frame| {
                if frame.frame_type == frame_type::PUB_SUB {
                    return;
                }
                print_frame(sender, frame, format);
                printed.fetch_add(1, Ordering::SeqCst);
            });
        });
    }

    thread::Builder::new()
        .name("wirepipe-accept".into())
        .spawn(move || {
            if let Err(err) = listener.run() {
                eprintln!("error: {err}");
                std::process::exit(pipe_error("listen failed", err).code);
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("accept thread spawn failed: {err}")))?;

    while running.load(Ordering::SeqCst) {
        if let Some(count) = args.count {
            if printed.load(Ordering::SeqCst) >= count {
                return Ok(SUCCESS);
            }
        }
        thread::sleep(Duration::from_millis(100));
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
