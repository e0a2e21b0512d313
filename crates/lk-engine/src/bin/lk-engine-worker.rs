//! Reference engine worker.
//!
//! Reads one request per line on stdin and answers on stdout with
//! `JSON:`-prefixed lines until it receives `Quit` or stdin closes.

use std::io::{self, BufRead, Write};

use clap::Parser;
use lk_engine::protocol::{Request, Response};
use lk_engine::worker::{WorkerSession, response_line};

#[derive(Parser, Debug)]
#[command(name = "lk-engine-worker")]
#[command(about = "Deterministic skirmish engine speaking the lockstep protocol", long_about = None)]
struct Args {
    /// Only accept replays recorded with this build
    #[arg(long)]
    build: Option<u32>,

    /// Only accept replays with this data version
    #[arg(long)]
    data_version: Option<String>,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    // Tags are handed out from a per-process base, like engine object ids.
    let tag_base = u64::from(rand::random::<u32>()) << 16;
    let mut session = WorkerSession::new(args.build, args.data_version, tag_base);

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let (response, quit) = match serde_json::from_str::<Request>(&line) {
            Ok(request) => session.handle(request),
            Err(e) => (Response::Error(format!("Invalid request: {}", e)), false),
        };

        writeln!(stdout, "{}", response_line(&response))?;
        stdout.flush()?;

        if quit {
            break;
        }
    }

    Ok(())
}
