//! # CLI - sector index shell
//!
//! A REPL over the sector index. Reads commands from stdin, executes them,
//! and prints results to stdout. Works interactively or with commands piped
//! in. Logs go to stderr.
//!
//! ## Commands
//!
//! ```text
//! PUT key value      Insert or update a raw key
//! GET key            Look up a raw key (prints value or "(nil)")
//! DEL key            Delete a key
//! MAP sector         Write a logical sector, prints its physical sector
//! RESOLVE sector     Physical sector of a logical one, or "(nil)"
//! FLUSH              Flush the memtable to a new SSTable
//! COMPACT            Merge all SSTables into one
//! STATS              Print engine debug info
//! EXIT / QUIT        Flush and shut down
//! ```
//!
//! ## Configuration
//!
//! Environment variables, see the `config` crate. `SECTORLOG_LOG` sets the
//! log filter (default "warn"); `RUST_LOG` takes precedence when set.
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! sectorlog started (dir=data/sst, tables=0, flush=1024KiB, trigger=4)
//! > MAP 42
//! 0
//! > RESOLVE 42
//! 0
//! > EXIT
//! bye
//! ```

use anyhow::Result;
use config::Config;
use engine::SectorRemapper;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn init_logging(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .init();
}

/// What the shell should do after a command.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Print(String),
    Exit,
}

fn text(s: impl Into<String>) -> Reply {
    Reply::Print(s.into())
}

fn parse_sector(arg: Option<&str>, usage: &str) -> std::result::Result<u64, Reply> {
    let raw = arg.ok_or_else(|| text(format!("ERR usage: {}", usage)))?;
    raw.parse()
        .map_err(|_| text(format!("ERR not a sector number: {}", raw)))
}

/// Runs one input line against the remapper.
fn execute(remap: &mut SectorRemapper, line: &str) -> Option<Reply> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?;

    let reply = match cmd.to_uppercase().as_str() {
        "PUT" => match parts.next() {
            Some(k) => {
                let v = parts.collect::<Vec<&str>>().join(" ");
                if v.is_empty() {
                    text("ERR usage: PUT key value")
                } else {
                    match remap.engine_mut().put(k.as_bytes(), v.as_bytes()) {
                        Ok(_) => text("OK"),
                        Err(e) => text(format!("ERR put failed: {}", e)),
                    }
                }
            }
            None => text("ERR usage: PUT key value"),
        },
        "GET" => match parts.next() {
            Some(k) => match remap.engine().get(k.as_bytes()) {
                Ok(Some(v)) => text(String::from_utf8_lossy(v.as_bytes())),
                Ok(None) => text("(nil)"),
                Err(e) => text(format!("ERR read failed: {}", e)),
            },
            None => text("ERR usage: GET key"),
        },
        "DEL" => match parts.next() {
            Some(k) => match remap.engine_mut().remove(k.as_bytes()) {
                Ok(Some(_)) => text("OK"),
                Ok(None) => text("(nil)"),
                Err(e) => text(format!("ERR delete failed: {}", e)),
            },
            None => text("ERR usage: DEL key"),
        },
        "MAP" => match parse_sector(parts.next(), "MAP sector") {
            Ok(logical) => match remap.write(logical) {
                Ok(physical) => text(physical.to_string()),
                Err(e) => text(format!("ERR map failed: {}", e)),
            },
            Err(reply) => reply,
        },
        "RESOLVE" => match parse_sector(parts.next(), "RESOLVE sector") {
            Ok(logical) => match remap.resolve(logical) {
                Ok(Some(physical)) => text(physical.to_string()),
                Ok(None) => text("(nil)"),
                Err(e) => text(format!("ERR resolve failed: {}", e)),
            },
            Err(reply) => reply,
        },
        "FLUSH" => match remap.engine_mut().flush() {
            Ok(()) => text(format!("OK (tables={})", remap.engine().table_count())),
            Err(e) => text(format!("ERR flush failed: {}", e)),
        },
        "COMPACT" => match remap.engine_mut().compact() {
            Ok(()) => text(format!("OK (tables={})", remap.engine().table_count())),
            Err(e) => text(format!("ERR compact failed: {}", e)),
        },
        "STATS" => text(format!("{:?}", remap.engine())),
        "EXIT" | "QUIT" => Reply::Exit,
        other => text(format!("unknown command: {}", other)),
    };
    Some(reply)
}

fn main() -> Result<()> {
    let cfg = Config::from_env()?;
    init_logging(&cfg);
    tracing::debug!(?cfg, "loaded config");

    let mut remap = SectorRemapper::open(&cfg)?;

    println!(
        "sectorlog started (dir={}, tables={}, flush={}KiB, trigger={})",
        cfg.data_dir.display(),
        remap.engine().table_count(),
        cfg.flush_threshold / 1024,
        cfg.compaction_trigger
    );
    println!("Commands: PUT key value | GET key | DEL key | MAP sector | RESOLVE sector");
    println!("          FLUSH | COMPACT | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match execute(&mut remap, &line) {
            Some(Reply::Print(out)) => println!("{}", out),
            Some(Reply::Exit) => break,
            None => {}
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    // Leave nothing behind in the memtable.
    remap.engine_mut().flush()?;
    println!("bye");
    Ok(())
}
