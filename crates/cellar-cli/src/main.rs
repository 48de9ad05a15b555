//! `cellar` command-line interface.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cellar_engine::{generate_key_file, BlockEngine, BlockRef, Keys, StoreConfig};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cellar")]
#[command(about = "Content-addressed, encrypted, deduplicating backup store", long_about = None)]
struct Cli {
    /// Config file path (default: ~/.cellar/config).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Key file path (default: ~/.cellar/keys).
    #[arg(short, long)]
    keys: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a fresh 96-byte key file.
    Genkeys,
    /// Snapshot a directory into the store.
    Create {
        /// Directory to snapshot.
        dir: PathBuf,
        /// Comment recorded with the snapshot.
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Restore a snapshot into a directory.
    Restore {
        /// Snapshot name.
        name: String,
        /// Output directory.
        out_dir: PathBuf,
    },
    /// Re-read and verify snapshots (all of them when none are named).
    Verify {
        /// Snapshot names.
        names: Vec<String>,
    },
    /// List stored snapshots.
    ListSnapshots,
    /// Recursively list the files of a snapshot or directory reference.
    ListFiles {
        /// Snapshot name or 48-hex directory reference.
        target: String,
    },
    /// Stream the contents of a reference to stdout.
    ShowRef {
        /// 48-hex block reference.
        reference: String,
    },
    /// Remove blocks unreachable from the retained snapshots
    /// (all snapshots are retained when none are named).
    Gc {
        /// Snapshot names to retain.
        names: Vec<String>,
        /// Report unreachable blocks without removing them.
        #[arg(long)]
        dry_run: bool,
    },
}

fn default_base_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".cellar")
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| default_base_dir().join("config"));
    let keys_path = cli.keys.unwrap_or_else(|| default_base_dir().join("keys"));

    if let Command::Genkeys = cli.command {
        generate_key_file(&keys_path)
            .with_context(|| format!("cannot generate keys at {}", keys_path.display()))?;
        println!("wrote {}", keys_path.display());
        return Ok(());
    }

    let config = StoreConfig::from_file(&config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;
    let keys = Keys::load(&keys_path)
        .with_context(|| format!("cannot load keys {}", keys_path.display()))?;
    let engine = BlockEngine::new(config.clone(), &keys)?;

    match cli.command {
        Command::Genkeys => {}
        Command::Create { dir, comment } => {
            config.make_paths()?;
            let name = cellar_snapshot::create(&engine, &config, &keys, &dir, &comment)?;
            println!("{name}");
        }
        Command::Restore { name, out_dir } => {
            cellar_snapshot::restore(&engine, &config, &keys, &name, &out_dir)?;
        }
        Command::Verify { names } => {
            for name in names_or_all(&config, names)? {
                cellar_snapshot::verify(&engine, &config, &keys, &name)?;
                println!("snapshot {name} OK");
            }
        }
        Command::ListSnapshots => {
            for name in cellar_snapshot::list_names(&config)? {
                let info = cellar_snapshot::load_info(&config, &keys, &name)?;
                println!("snapshot:     {name}");
                println!("date:         {}", format_time(info.time_secs));
                println!("source path:  {}", info.source_path.display());
                println!("root ref:     {}", info.dir_ref);
                if !info.comment.is_empty() {
                    println!("comment:      {}", info.comment);
                }
                println!();
            }
        }
        Command::ListFiles { target } => {
            let dir_ref = if cellar_snapshot::is_valid_name(&target) {
                cellar_snapshot::load_info(&config, &keys, &target)?.dir_ref
            } else {
                BlockRef::from_hex(target.as_bytes())
                    .with_context(|| format!("bad ref {target:?}"))?
            };
            list_directory(&engine, Path::new(""), &dir_ref)?;
        }
        Command::ShowRef { reference } => {
            let reference = BlockRef::from_hex(reference.as_bytes())
                .with_context(|| format!("bad ref {reference:?}"))?;
            let mut reader = engine.new_reader(&reference)?;
            let mut stdout = std::io::stdout().lock();
            reader.write_to(&mut stdout)?;
            stdout.flush()?;
        }
        Command::Gc { names, dry_run } => {
            let names = names_or_all(&config, names)?;
            let stats =
                cellar_snapshot::collect_garbage(&engine, &config, &keys, &names, dry_run)?;
            println!(
                "scanned {} blocks, {} {} unreachable ({} bytes)",
                stats.blocks_scanned,
                if dry_run { "found" } else { "removed" },
                stats.blocks_removed,
                stats.bytes_reclaimed
            );
        }
    }
    Ok(())
}

/// Uses the given snapshot names after validating them, or every stored
/// snapshot when none are given.
fn names_or_all(config: &StoreConfig, names: Vec<String>) -> Result<Vec<String>> {
    if names.is_empty() {
        return Ok(cellar_snapshot::list_names(config)?);
    }
    for name in &names {
        if !cellar_snapshot::is_valid_name(name) {
            bail!("invalid snapshot name {name}");
        }
    }
    Ok(names)
}

fn list_directory(engine: &BlockEngine, base: &Path, dir_ref: &BlockRef) -> Result<()> {
    for entry in cellar_snapshot::load_directory(engine, dir_ref)? {
        let path = base.join(&entry.name);
        println!(
            "{}  {}  {}  {}",
            mode_string(entry.mode, entry.is_dir),
            format_mtime(entry.modified_secs),
            size_string(entry.size),
            path.display()
        );
        if entry.is_dir {
            list_directory(engine, &path, &entry.reference)?;
        }
    }
    Ok(())
}

fn format_time(secs: u64) -> String {
    Local
        .timestamp_opt(secs as i64, 0)
        .single()
        .map(|t| t.to_rfc2822())
        .unwrap_or_else(|| secs.to_string())
}

fn format_mtime(secs: u64) -> String {
    Local
        .timestamp_opt(secs as i64, 0)
        .single()
        .map(|t| t.format("%d %b %Y %H:%M").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn mode_string(mode: u32, is_dir: bool) -> String {
    let mut s = String::with_capacity(10);
    s.push(if is_dir { 'd' } else { '-' });
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

fn size_string(n: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;
    match n {
        _ if n >= TIB => format!("{:5.1}T", n as f64 / TIB as f64),
        _ if n >= GIB => format!("{:5.1}G", n as f64 / GIB as f64),
        _ if n >= MIB => format!("{:5.1}M", n as f64 / MIB as f64),
        _ if n >= KIB => format!("{:5.1}K", n as f64 / KIB as f64),
        _ => format!("{n:6}"),
    }
}
