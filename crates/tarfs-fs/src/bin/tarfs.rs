//! tarfs: inspect tar archives without extracting them.
//!
//! # Usage
//!
//! ```bash
//! # List the archive root
//! tarfs rootfs.tar ls
//!
//! # Print a file, following symlinks
//! tarfs rootfs.tar cat etc/os-release
//!
//! # Show metadata as JSON
//! tarfs rootfs.tar stat usr/bin --json
//! ```

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tarfs_fs::{FileKind, TarFs};

/// Inspect tar archives without extracting them.
#[derive(Parser, Debug)]
#[command(name = "tarfs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the tar archive, or `-` for stdin
    #[arg(value_name = "ARCHIVE")]
    archive: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        /// Directory inside the archive
        #[arg(default_value = ".")]
        path: String,
    },
    /// Write a file's contents to stdout
    Cat {
        /// File inside the archive
        path: String,
    },
    /// Show metadata for a path
    Stat {
        /// Path inside the archive
        path: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List every path below a directory
    Tree {
        /// Directory inside the archive
        #[arg(default_value = ".")]
        path: String,
    },
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let fs = match open(&args.archive) {
        Ok(fs) => fs,
        Err(e) => {
            error!("Failed to open archive: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&fs, &args.command) {
        error!("{}", e);
        process::exit(1);
    }
}

fn open(archive: &Path) -> tarfs_fs::Result<TarFs> {
    if archive.as_os_str() == "-" {
        info!("Reading archive from stdin");
        return stdin_source().and_then(TarFs::from_file);
    }

    info!("Opening archive: {}", archive.display());
    TarFs::open_path(archive)
}

/// Stdin as a file, so seekable redirects (`< archive.tar`) work and pipes
/// are rejected as unseekable.
#[cfg(unix)]
fn stdin_source() -> tarfs_fs::Result<std::fs::File> {
    use std::os::fd::AsFd;
    let fd = io::stdin().as_fd().try_clone_to_owned()?;
    Ok(std::fs::File::from(fd))
}

#[cfg(not(unix))]
fn stdin_source() -> tarfs_fs::Result<std::fs::File> {
    Err(tarfs_fs::Error::NotSeekable(io::Error::new(
        io::ErrorKind::Unsupported,
        "stdin archives are only supported on unix",
    )))
}

fn run(fs: &TarFs, command: &Command) -> tarfs_fs::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Command::Ls { path } => {
            for entry in fs.read_dir(path)? {
                let marker = if entry.is_dir() { "/" } else { "" };
                writeln!(out, "{:>10}  {}{}", entry.size, entry.name, marker)?;
            }
        }
        Command::Cat { path } => {
            if let Some(mut file) = fs.open(path)?.into_file() {
                io::copy(&mut file, &mut out)?;
            } else {
                return Err(tarfs_fs::Error::IsADirectory(path.clone()));
            }
        }
        Command::Stat { path, json } => {
            let meta = fs.stat(path)?;
            if *json {
                let text = serde_json::to_string_pretty(&meta).map_err(io::Error::from)?;
                writeln!(out, "{}", text)?;
            } else {
                let kind = match meta.kind {
                    FileKind::File => "regular file",
                    FileKind::Dir => "directory",
                };
                writeln!(out, "  Name: {}", meta.name)?;
                writeln!(out, "  Kind: {}", kind)?;
                writeln!(out, "  Size: {}", meta.size)?;
                writeln!(out, "  Mode: {:04o}", meta.mode)?;
                writeln!(out, "Modify: {}", meta.modified.to_rfc3339())?;
            }
        }
        Command::Tree { path } => {
            for entry in fs.walk(path)? {
                writeln!(out, "{}", entry)?;
            }
        }
    }

    out.flush()?;
    Ok(())
}
