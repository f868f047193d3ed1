use clap::{Parser, Subcommand};
use m2pack::{Archive, PackEntry, PackVersion};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "m2pack", about = "Packed game-asset archive (MS2F/NS2F/OS2F/PS2F) CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List archive contents
    List {
        header: PathBuf,
        /// Emit the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show archive metadata
    Info {
        header: PathBuf,
    },
    /// Decrypt every entry into a directory tree
    Unpack {
        header: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Build a new archive pair from input files
    Pack {
        /// Output header file (.m2h); the data file sits next to it (.m2d)
        #[arg(short, long)]
        output: PathBuf,
        /// Format version: MS2F, NS2F, OS2F (default), PS2F
        #[arg(short, long, default_value = "OS2F")]
        version: String,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Add a file as a new entry and save to a new pair
    Add {
        header: PathBuf,
        file: PathBuf,
        /// Virtual path of the new entry
        #[arg(long = "as")]
        entry: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Remove an entry and save to a new pair
    Remove {
        header: PathBuf,
        entry: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Replace an entry's contents and save to a new pair
    Replace {
        header: PathBuf,
        entry: String,
        file: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { header, json } => {
            let ar = Archive::open(&header, data_path_for(&header))?;
            let rows = ar.list();
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{:<6} {:>12} {:>12} {:>9}  Path", "Index", "Size", "Encoded", "Pipeline");
                for r in &rows {
                    println!(
                        "{:<6} {:>12} {:>12} {:>9}  {}",
                        r.index,
                        r.raw_size.map_or_else(|| "—".into(), |v| v.to_string()),
                        r.encoded_size.map_or_else(|| "—".into(), |v| v.to_string()),
                        r.pipeline.unwrap_or("new"),
                        r.path,
                    );
                }
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { header } => {
            let ar = Archive::open(&header, data_path_for(&header))?;
            let (manifest, table) = ar.declared_sizes();
            println!("── Packed archive ──────────────────────────────────────");
            println!("  Header         {}", header.display());
            println!("  Version        {}", ar.version().name());
            println!("  Entries        {}", ar.len());
            println!("  Manifest       raw {} / compressed {} / encoded {} B",
                     manifest.raw, manifest.compressed, manifest.encoded);
            println!("  File table     raw {} / compressed {} / encoded {} B",
                     table.raw, table.compressed, table.encoded);
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { header, output_dir } => {
            let mut ar = Archive::open(&header, data_path_for(&header))?;
            let paths: Vec<String> = ar.entries().iter().map(|e| e.path.clone()).collect();
            for path in paths {
                let data = ar.read_entry(&path)?;
                let dest = output_dir.join(&path);
                if let Some(dir) = dest.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                std::fs::write(&dest, data)?;
                println!("  unpacked  {}", dest.display());
            }
            println!("Unpacked to: {}", output_dir.display());
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, version, input } => {
            let version = PackVersion::from_name(&version)
                .ok_or_else(|| format!("unknown version tag '{version}'"))?;
            let mut ar = Archive::create(version);
            for path in &input {
                let name = path
                    .file_name()
                    .ok_or_else(|| format!("not a file: {}", path.display()))?
                    .to_string_lossy()
                    .into_owned();
                let data = std::fs::read(path)?;
                ar.add_entry("", PackEntry::new(name, data))?;
                println!("  packed  {}", path.display());
            }
            let report = ar.save(&output, data_path_for(&output), None)?;
            println!("Created: {} ({} entries, {} data bytes)",
                     output.display(), report.entries, report.data_bytes);
        }

        // ── Add ──────────────────────────────────────────────────────────────
        Commands::Add { header, file, entry, output } => {
            let mut ar = Archive::open(&header, data_path_for(&header))?;
            let data = std::fs::read(&file)?;
            ar.add_entry("", PackEntry::new(entry, data))?;
            save_pair(&mut ar, &output)?;
        }

        // ── Remove ───────────────────────────────────────────────────────────
        Commands::Remove { header, entry, output } => {
            let mut ar = Archive::open(&header, data_path_for(&header))?;
            ar.remove_entry(&entry)?;
            save_pair(&mut ar, &output)?;
        }

        // ── Replace ──────────────────────────────────────────────────────────
        Commands::Replace { header, entry, file, output } => {
            let mut ar = Archive::open(&header, data_path_for(&header))?;
            let data = std::fs::read(&file)?;
            ar.set_entry_data(&entry, data)?;
            save_pair(&mut ar, &output)?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// The data blob sits next to the header file: `Xml.m2h` → `Xml.m2d`.
fn data_path_for(header: &Path) -> PathBuf {
    header.with_extension("m2d")
}

fn save_pair(ar: &mut Archive, out_header: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let report = ar.save(out_header, data_path_for(out_header), None)?;
    println!("Saved: {} ({} entries, {} data bytes)",
             out_header.display(), report.entries, report.data_bytes);
    Ok(())
}
