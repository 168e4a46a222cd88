use clap::{Parser, Subcommand};
use gdpck::path::RES_SCHEME;
use gdpck::{checksum, Container, PckOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gdpck", version, about = "Inspect and edit .pck resource containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List container contents
    List {
        input: PathBuf,
        /// Only list entries directly inside this directory
        #[arg(short, long)]
        dir: Option<String>,
        /// Show offsets, sizes and checksums
        #[arg(short, long)]
        verbose: bool,
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a file, creating the container if needed
    Add {
        input: PathBuf,
        file:  PathBuf,
        /// Internal path (defaults to the file name)
        #[arg(long = "as")]
        internal: Option<String>,
    },
    /// Delete an entry
    Delete {
        input: PathBuf,
        path:  String,
    },
    /// Extract everything, or one entry
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        /// Extract only this entry
        #[arg(short, long)]
        entry: Option<String>,
        /// Skip checksum verification
        #[arg(long)]
        no_verify: bool,
    },
    /// Pack a directory tree into a new container
    Pack {
        output: PathBuf,
        source: PathBuf,
        /// Replace an existing container
        #[arg(long)]
        overwrite: bool,
    },
    /// Show header fields
    Info {
        input: PathBuf,
    },
    /// Re-hash every entry
    Verify {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match Cli::parse().command {

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, dir, verbose, json } => {
            let pck = Container::open(&input)?;
            let paths = match dir {
                Some(d) => pck.list_dir(&d)?,
                None    => pck.list_all(),
            };
            if json {
                let infos: Vec<_> = paths
                    .iter()
                    .map(|p| pck.get(p).map(gdpck::EntryInfo::from))
                    .collect::<Result<_, _>>()?;
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                println!("Contents of '{}':", input.display());
                for p in &paths {
                    let e = pck.get(p)?;
                    if verbose {
                        println!("{RES_SCHEME}{:<40} {:>10} {:>10}  {}{}",
                            e.path, e.offset, e.length, checksum::to_hex(&e.checksum),
                            if e.is_encrypted() { "  [encrypted]" } else { "" });
                    } else {
                        println!("{RES_SCHEME}{} size: {}", e.path, e.length);
                    }
                }
                println!("end of contents.");
            }
        }

        // ── Add ──────────────────────────────────────────────────────────────
        Commands::Add { input, file, internal } => {
            let internal = match internal {
                Some(p) => p,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or("file has no name; pass --as")?,
            };
            let mut pck = Container::open_or_create(&input)?;
            pck.add_file(&file, &internal)?;
            println!("  added  {} -> {}{}", file.display(), RES_SCHEME, pck.get(&internal)?.path);
        }

        // ── Delete ───────────────────────────────────────────────────────────
        Commands::Delete { input, path } => {
            let mut pck = Container::open(&input)?;
            pck.delete(&path)?;
            println!("  deleted  {path}");
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir, entry, no_verify } => {
            let opts = PckOptions { verify_checksums: !no_verify, ..PckOptions::default() };
            let pck = Container::open_with(&input, opts)?;
            match entry {
                Some(e) => {
                    let target = output_dir.join(gdpck::path::normalize(&e)?);
                    pck.extract_one(&e, &target)?;
                    println!("Extracted: {}", target.display());
                }
                None => {
                    let n = pck.extract_all(&output_dir)?;
                    println!("Extracted {n} entries to: {}", output_dir.display());
                }
            }
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, source, overwrite } => {
            let mut pck = if output.exists() {
                Container::open(&output)?
            } else {
                Container::create(&output)
            };
            let n = pck.pack(&source, overwrite)?;
            println!("Packed {n} entries into: {}", output.display());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let pck = Container::open(&input)?;
            let h = pck.header();
            println!("── .pck container ───────────────────────────────────────");
            println!("  Path             {}", input.display());
            println!("  Format version   {}", h.format_version);
            println!("  Producer         {}", h.producer_version);
            println!("  Encrypted        {}", h.is_encrypted());
            println!("  Data region at   {} B", h.data_region_offset);
            println!("  Entries          {}", pck.len());
            println!("  Directories      {}", pck.directories().len());
            println!("  Data size        {} B", pck.entries().map(|e| e.length).sum::<u64>());
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let pck = Container::open(&input)?;
            let n = pck.verify()?;
            println!("ok: {n} entries");
        }
    }

    Ok(())
}
