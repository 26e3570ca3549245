//! Offline dry run of the round sampler.
//!
//! Loads a menu dump and a weight setting, then prints each eligible
//! candidate's first-pick probability and a few sample rounds. Nothing is
//! sent anywhere.

use std::fs;
use std::path::PathBuf;

use ccshuffle::candidate::{CandidateMenu, EffectCandidate};
use ccshuffle::prng::Prng;
use ccshuffle::sampler;
use ccshuffle::scheduler::RoundScheduler;
use ccshuffle::weights::WeightConfig;
use serde_json::Value;

struct Args {
    menu: PathBuf,
    weights: Option<PathBuf>,
    uniform: bool,
    rounds: usize,
    seed: Option<u64>,
}

fn print_help() {
    println!("ccshuffle - offline shuffle-round dry run");
    println!();
    println!("Usage: ccshuffle [options] <menu.json>");
    println!();
    println!("The menu file may be a bare array of effects, an object with an");
    println!("`effects` array, or a saved getGameSessionMenu response.");
    println!();
    println!("Options:");
    println!("  --weights <file>   WeightConfig JSON (default: deployment defaults)");
    println!("  --uniform          Ignore cost and pool weighting");
    println!("  --rounds <n>       Sample rounds to print (default 5)");
    println!("  --seed <n>         Fixed RNG seed");
}

fn bad_usage(msg: &str) -> ! {
    eprintln!("{}", msg);
    print_help();
    std::process::exit(2);
}

fn parse_args() -> Args {
    let mut args = std::env::args().skip(1);
    let mut menu = None;
    let mut out = Args {
        menu: PathBuf::new(),
        weights: None,
        uniform: false,
        rounds: 5,
        seed: None,
    };
    while let Some(a) = args.next() {
        match a.as_str() {
            "-h" | "--help" | "help" => {
                print_help();
                std::process::exit(0);
            }
            "--weights" => out.weights = args.next().map(PathBuf::from),
            "--uniform" => out.uniform = true,
            "--rounds" => {
                out.rounds = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| bad_usage("--rounds needs a number"))
            }
            "--seed" => {
                out.seed = Some(
                    args.next()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or_else(|| bad_usage("--seed needs a number")),
                )
            }
            _ if a.starts_with("--") => bad_usage(&format!("Unknown option: {a}")),
            _ => menu = Some(PathBuf::from(a)),
        }
    }
    out.menu = menu.unwrap_or_else(|| bad_usage("Missing menu file"));
    out
}

/// Accept the shapes a menu dump usually comes in.
fn effects_from(doc: Value) -> Result<Vec<EffectCandidate>, serde_json::Error> {
    let list = match doc {
        Value::Array(_) => doc,
        Value::Object(_) => doc
            .pointer("/result/data/menu/effects")
            .or_else(|| doc.pointer("/menu/effects"))
            .or_else(|| doc.get("effects"))
            .cloned()
            .unwrap_or(Value::Array(Vec::new())),
        _ => Value::Array(Vec::new()),
    };
    serde_json::from_value(list)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    let doc: Value = serde_json::from_str(&fs::read_to_string(&args.menu)?)?;
    let menu = CandidateMenu::from_effects(effects_from(doc)?);
    let mut cfg = match &args.weights {
        Some(path) => serde_json::from_str::<WeightConfig>(&fs::read_to_string(path)?)?.clamped(),
        None => WeightConfig::default(),
    };
    if args.uniform {
        cfg.cost_weight = 0;
        cfg.pool_weight = 0;
    }

    let eligible = menu.eligible(&cfg);
    println!(
        "{} candidate(s), {} eligible | cost {} x {} max {} | pool {} x {}",
        menu.len(),
        eligible.len(),
        cfg.cost_weight,
        cfg.cost_factor,
        cfg.max_price,
        cfg.pool_weight,
        cfg.pool_factor
    );

    let dist = sampler::distribution(&eligible, &cfg);
    let mut ranked: Vec<(&EffectCandidate, f64)> = eligible.iter().zip(dist).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    println!();
    println!("{:>8}  {:>7}  {:>6}  name", "p(first)", "price", "pool");
    for (c, p) in &ranked {
        let pool = c.pool.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        println!("{:>7.2}%  {:>7}  {:>6}  {}", p * 100.0, c.price, pool, c.name);
    }

    let rng = match args.seed {
        Some(seed) => Prng::new(seed),
        None => Prng::from_time(),
    };
    let mut scheduler = RoundScheduler::new(1, rng);
    for n in 1..=args.rounds {
        println!();
        match scheduler.build_round(&eligible, &cfg) {
            Ok(round) => {
                println!("Round {n}:");
                for label in round.labels() {
                    println!("  {label}");
                }
            }
            Err(e) => {
                println!("Round {n}: {e}");
                break;
            }
        }
        scheduler.reset();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_dumps_in_every_shape_load() {
        let effect = serde_json::json!({"effectID": "kill", "name": "Kill", "price": 250});
        let shapes = [
            serde_json::json!([effect]),
            serde_json::json!({"effects": [effect]}),
            serde_json::json!({"menu": {"effects": [effect]}}),
            serde_json::json!({"result": {"data": {"menu": {"effects": [effect]}}}}),
        ];
        for doc in shapes {
            let effects = effects_from(doc).unwrap();
            assert_eq!(effects.len(), 1);
            assert_eq!(effects[0].id, "kill");
        }
        assert!(effects_from(serde_json::json!("nope")).unwrap().is_empty());
    }
}
