use clap::{Parser, Subcommand};
use rvzstream::container::{sniff_kind, Container, OpenOptions};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Read size for extract and hash.
const COPY_BUFFER_SIZE: usize = 4 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "rvz", about = "Read WIA/RVZ containers as their original disc images")]
struct Cli {
    /// Log decode details (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Skip SHA-1 checks of the container headers
    #[arg(long, global = true)]
    no_verify: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show container metadata
    Info {
        input: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the console the disc belongs to
    Kind {
        input: PathBuf,
    },
    /// Write the reconstructed disc image to a file
    Extract {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Leave Wii partitions decrypted, with zeroed hash headers
        #[arg(long)]
        plain: bool,
    },
    /// SHA-1 of the reconstructed disc image
    Hash {
        input: PathBuf,
        /// Hash the decrypted image instead
        #[arg(long)]
        plain: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let mut disc = open(&input, cli.no_verify, false)?;
            let info = disc.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }
            println!("── {} container ─────────────────────────────────────────", info.format);
            println!("  Path           {}", input.display());
            println!("  Version        {}", info.version);
            println!("  Disc           {} ({})", info.disc_kind, disc.console_kind().name());
            println!("  Compression    {} (level {})", info.compression, info.compression_level);
            println!("  Chunk size     {} B", info.chunk_size);
            println!("  ISO size       {} B", info.iso_size);
            println!("  File size      {} B", info.file_size);
            println!("  Partitions     {}", info.partitions);
            println!("  Raw entries    {}", info.raw_entries);
            println!("  Groups         {}", info.groups);
            println!("  Encrypted      {}", info.encrypted);
        }

        // ── Kind ─────────────────────────────────────────────────────────────
        Commands::Kind { input } => {
            println!("{}", sniff_kind(&input)?.name());
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output, plain } => {
            let mut disc = open(&input, cli.no_verify, plain)?;
            let size = disc.size();
            let mut out = BufWriter::new(File::create(&output)?);
            let written = copy_image(&mut disc, |chunk| out.write_all(chunk))?;
            out.flush()?;
            if written < size {
                eprintln!("warning: image truncated at {written} of {size} bytes");
            }
            println!("Extracted → {}", output.display());
        }

        // ── Hash ─────────────────────────────────────────────────────────────
        Commands::Hash { input, plain } => {
            let mut disc = open(&input, cli.no_verify, plain)?;
            let mut hasher = Sha1::new();
            copy_image(&mut disc, |chunk| {
                hasher.update(chunk);
                Ok(())
            })?;
            println!("{}  {}", hex::encode(hasher.finalize()), input.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn open(path: &Path, no_verify: bool, plain: bool) -> Result<Container, Box<dyn std::error::Error>> {
    let opts = OpenOptions::default()
        .verify_hashes(!no_verify)
        .emulate_encryption(!plain);
    Ok(Container::open_with(path, &opts)?)
}

/// Stream the whole image through `sink`.  Stops early on a zero read.
fn copy_image<F>(disc: &mut Container, mut sink: F) -> std::io::Result<u64>
where
    F: FnMut(&[u8]) -> std::io::Result<()>,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = disc.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sink(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}
