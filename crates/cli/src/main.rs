//! Interactive REPL demo for the ShoalKV storage engine.
//!
//! Keys and values are taken verbatim from the command line; the value is
//! everything after the key, spaces included.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use engine::Engine;
use tracing_subscriber::{fmt, EnvFilter};

/// ShoalKV demo REPL
#[derive(Parser, Debug)]
#[command(name = "shoalkv")]
#[command(about = "Embeddable LSM key-value store, interactive demo")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "shoal_data")]
    data_dir: String,

    /// MemTable size in bytes at which a flush is triggered
    #[arg(short, long, default_value_t = 256 * 1024)]
    flush_threshold: usize,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();

    let mut db = match Engine::open(&args.data_dir, args.flush_threshold) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("failed to open engine in '{}': {:#}", args.data_dir, e);
            return ExitCode::FAILURE;
        }
    };

    println!("shoalkv ready in '{}'. Type help for commands.", args.data_dir);
    match repl(&mut db) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn repl(db: &mut Engine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        print!("> ");
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let input = line.trim_end_matches(['\r', '\n']);
        if input.is_empty() {
            continue;
        }

        let (cmd, rest) = split_word(input);
        match cmd {
            "put" => {
                let (key, value) = split_word(rest);
                if key.is_empty() {
                    println!("ERR: put needs <key> [value]");
                    continue;
                }
                report(db.put(key.as_bytes(), value.as_bytes()));
            }
            "get" => {
                let (key, _) = split_word(rest);
                if key.is_empty() {
                    println!("ERR: get needs <key>");
                    continue;
                }
                match db.get(key.as_bytes()) {
                    Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
                    Ok(None) => println!("(nil)"),
                    Err(e) => println!("ERR: {:#}", e),
                }
            }
            "del" => {
                let (key, _) = split_word(rest);
                if key.is_empty() {
                    println!("ERR: del needs <key>");
                    continue;
                }
                report(db.del(key.as_bytes()));
            }
            "flush" => report(db.flush()),
            "sync" => report(db.sync()),
            "list" => {
                let tables = db.tables();
                println!("SSTables (newest->oldest): {}", tables.len());
                for t in tables {
                    println!("  {} (id={}, index={})", t.path.display(), t.file_id, t.index_len);
                }
            }
            "stats" => {
                println!("memtable entries:  {}", db.mem_entries());
                println!("memtable bytes:    {}", db.mem_bytes());
                println!("flush threshold:   {}", db.flush_threshold());
                println!("sstables:          {}", db.tables().len());
            }
            "help" => print_help(),
            "exit" | "quit" => break,
            _ => println!("unknown command, type help"),
        }
    }
    Ok(())
}

fn report(result: Result<()>) {
    match result {
        Ok(()) => println!("OK"),
        Err(e) => println!("ERR: {:#}", e),
    }
}

// Splits off the first space-delimited word; the remainder keeps any
// further spaces (values may contain them).
fn split_word(s: &str) -> (&str, &str) {
    match s.find(' ') {
        Some(i) => (&s[..i], &s[i + 1..]),
        None => (s, ""),
    }
}

fn print_help() {
    println!(
        "Commands:\n\
         \x20 put <key> <value...>   insert or overwrite a key\n\
         \x20 get <key>              look up a key\n\
         \x20 del <key>              delete a key\n\
         \x20 flush                  persist the memtable as an SSTable\n\
         \x20 list                   show open SSTables, newest first\n\
         \x20 sync                   fsync the write-ahead log\n\
         \x20 stats                  memtable and table counters\n\
         \x20 help                   this text\n\
         \x20 exit                   quit"
    );
}
