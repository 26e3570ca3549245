//! CLI client for the `ccshuffled` daemon.
//!
//! Examples:
//!   ccshuffle-cli status
//!   ccshuffle-cli start
//!   ccshuffle-cli pause on
//!   ccshuffle-cli cycle 5
//!   ccshuffle-cli costweight -10 1 500
//!   ccshuffle-cli vote somebody 3
//!   ccshuffle-cli watch
//!
//! By default it talks to 127.0.0.1:9877; override with `--addr host:port`.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use ccshuffle::protocol::{Request, Response, StatusSnapshot, DEFAULT_ADDR};

fn usage() -> ! {
    eprintln!("ccshuffle-cli (talks to ccshuffled @ {DEFAULT_ADDR} by default)");
    eprintln!("Usage: ccshuffle-cli [--addr host:port] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  status                          Show session and round state");
    eprintln!("  start | stop                    Control shuffle mode");
    eprintln!("  pause <on|off>                  Freeze or resume the countdown");
    eprintln!("  cycle [seconds]                 Set time left in this stage (none = skip)");
    eprintln!("  intervals <round> <cooldown>    Voting and cooldown seconds");
    eprintln!("  costweight <w> <f> [maxprice]   Cost weighting (0 = uniform)");
    eprintln!("  poolweight <w> <f>              Pool weighting (0 = off)");
    eprintln!("  vote <voter> <text...>          Relay a chat vote");
    eprintln!("  watch                           Print every round as it opens");
    eprintln!("  shutdown                        Stop the session and exit daemon");
    process::exit(1);
}

fn fail(msg: &str) -> ! {
    eprintln!("{}", msg);
    process::exit(1);
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let mut addr = DEFAULT_ADDR.to_string();
    if args.len() >= 2 && args[0] == "--addr" {
        addr = args[1].clone();
        args.drain(0..2);
    }

    if args.is_empty() {
        usage();
    }

    (addr, args)
}

fn arg<T: FromStr>(args: &[String], i: usize, what: &str) -> T {
    let Some(raw) = args.get(i) else { usage() };
    raw.parse()
        .unwrap_or_else(|_| fail(&format!("{what} must be a whole number")))
}

fn connect(addr: &str) -> Result<(TcpStream, BufReader<TcpStream>), String> {
    let stream = TcpStream::connect(addr).map_err(|e| format!("connect: {e}"))?;
    let reader = BufReader::new(stream.try_clone().map_err(|e| format!("clone: {e}"))?);
    Ok((stream, reader))
}

fn write_request(stream: &mut TcpStream, req: &Request) -> Result<(), String> {
    let line = serde_json::to_string(req).map_err(|e| format!("serialize: {e}"))?;
    stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .map_err(|e| format!("send: {e}"))
}

fn read_response(reader: &mut BufReader<TcpStream>) -> Result<Response, String> {
    let mut resp_line = String::new();
    let n = reader
        .read_line(&mut resp_line)
        .map_err(|e| format!("recv: {e}"))?;
    if n == 0 {
        return Err("daemon closed the connection".to_string());
    }
    serde_json::from_str(&resp_line).map_err(|e| format!("parse response: {e}"))
}

fn send_request(addr: &str, req: &Request) -> Result<Response, String> {
    let (mut stream, mut reader) = connect(addr)?;
    // Start/stop wait on the backend and the push channel.
    stream
        .set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| format!("set_read_timeout: {e}"))?;
    write_request(&mut stream, req)?;
    read_response(&mut reader)
}

fn watch(addr: &str) -> Result<(), String> {
    let (mut stream, mut reader) = connect(addr)?;
    write_request(&mut stream, &Request::Subscribe)?;
    loop {
        match read_response(&mut reader)? {
            Response::Round { options } => {
                println!("--- new round ---");
                for label in options {
                    println!("  {label}");
                }
            }
            Response::Success { message } => println!("{message}"),
            Response::Error { message } => return Err(message),
            Response::State(_) => {}
        }
    }
}

fn print_state(s: StatusSnapshot) {
    println!(
        "started={} stopping={} listener={} paused={} stage={:?} time_left={}s rounds={}",
        s.started, s.stopping, s.listener_running, s.paused, s.stage, s.time_left, s.rounds_built,
    );
    println!(
        "session={} game={} link={}",
        s.session_id.as_deref().unwrap_or("-"),
        s.game_name.as_deref().unwrap_or("-"),
        s.interact_link.as_deref().unwrap_or("-"),
    );
    let w = s.weights;
    println!(
        "cost={} x {} x {} pool={} x {} intervals={}s/{}s candidates={} eligible={}",
        w.cost_weight,
        w.cost_factor,
        w.max_price,
        w.pool_weight,
        w.pool_factor,
        w.round_secs,
        w.cooldown_secs,
        s.candidates,
        s.eligible,
    );
    for o in s.options {
        println!("  {:>3}  {}", o.votes, o.label);
    }
}

fn main() {
    let (addr, args) = parse_args();
    let cmd = &args[0];

    let req = match cmd.as_str() {
        "status" => Request::GetState,
        "start" => Request::Start,
        "stop" => Request::Stop,
        "pause" => match args.get(1).map(String::as_str) {
            Some("on") => Request::Pause { paused: true },
            Some("off") => Request::Pause { paused: false },
            _ => fail("pause must be 'on' or 'off'"),
        },
        "cycle" => Request::Cycle {
            seconds: args.get(1).map(|_| arg(&args, 1, "seconds")),
        },
        "intervals" => Request::SetIntervals {
            round_secs: arg(&args, 1, "round"),
            cooldown_secs: arg(&args, 2, "cooldown"),
        },
        "costweight" => Request::SetCostWeight {
            weight: arg(&args, 1, "weight"),
            factor: arg(&args, 2, "factor"),
            max_price: args.get(3).map(|_| arg(&args, 3, "maxprice")),
        },
        "poolweight" => Request::SetPoolWeight {
            weight: arg(&args, 1, "weight"),
            factor: arg(&args, 2, "factor"),
        },
        "vote" => {
            if args.len() < 3 {
                usage();
            }
            Request::Vote {
                voter: args[1].clone(),
                text: args[2..].join(" "),
            }
        }
        "watch" => {
            if let Err(e) = watch(&addr) {
                fail(&format!("Failed: {e}"));
            }
            process::exit(0);
        }
        "shutdown" => Request::Shutdown,
        _ => usage(),
    };

    match send_request(&addr, &req) {
        Ok(Response::State(s)) => print_state(s),
        Ok(Response::Success { message }) => println!("{message}"),
        Ok(Response::Round { options }) => println!("{}", options.join("\n")),
        Ok(Response::Error { message }) => fail(&format!("Error: {message}")),
        Err(e) => fail(&format!("Failed: {e}")),
    }
}
