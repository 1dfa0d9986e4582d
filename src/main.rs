mod config;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};

use config::Config;
use ti99_dskimg::disk::check::RepairStatus;
use ti99_dskimg::{DskError, DskImage, FileData, FileEntry, FileType, Health, Preset};

#[derive(Parser)]
#[command(name = "dskimg")]
#[command(about = "Tool for working with TI-99/4A disk images", long_about = None)]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a freshly formatted image
    Create {
        image: PathBuf,
        /// Disk format (SSSD40, DSSD40, DSDD40, DSSD80, DSDD80)
        #[arg(long)]
        preset: Option<Preset>,
        /// Volume name
        #[arg(long)]
        name: Option<String>,
    },
    /// List the catalog
    Dir { image: PathBuf },
    /// Export a file's content to the host
    Read {
        image: PathBuf,
        file: String,
        /// Destination path, defaults to the file name in the current directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Store a host file onto the image
    Write {
        image: PathBuf,
        file: String,
        /// Host file with the content
        #[arg(long)]
        from: PathBuf,
        /// File type: PROGRAM, DIS/FIX, DIS/VAR, INT/FIX or INT/VAR
        #[arg(long, default_value = "PROGRAM")]
        kind: String,
        /// Record length for FIX and VAR types
        #[arg(long)]
        reclen: Option<u8>,
    },
    /// Rename a file
    Rename {
        image: PathBuf,
        old: String,
        new: String,
    },
    /// Delete a file
    Del {
        image: PathBuf,
        file: String,
        /// Zero the data sectors before freeing them
        #[arg(long)]
        safe: bool,
    },
    /// Rename the volume
    Volname { image: PathBuf, name: String },
    /// Check volume consistency
    Check { image: PathBuf },
    /// Plan repairs, or apply them with --apply
    Repair {
        image: PathBuf,
        #[arg(long)]
        apply: bool,
    },
    /// Show image information
    Info { image: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    TermLogger::init(
        level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Create {
            image,
            preset,
            name,
        } => {
            let preset = match (preset, config.defaults.preset.as_deref()) {
                (Some(p), _) => p,
                (None, Some(p)) => p.parse()?,
                (None, None) => Preset::Sssd40,
            };
            let volume_name = name
                .or(config.defaults.volume_name.clone())
                .unwrap_or_else(|| "UNNAMED".to_string());
            let mut img = DskImage::create(preset, &volume_name)?;
            img.save_as(&image)?;
            println!("created {} image {}", preset, image.display());
        }
        Commands::Dir { image } => {
            let img = load_image(&image, &config)?;
            print_catalog(&img)?;
        }
        Commands::Read {
            image,
            file,
            output,
        } => {
            let img = load_image(&image, &config)?;
            let bytes = img.read_file(&file)?;
            let output = output.unwrap_or_else(|| PathBuf::from(file.to_uppercase()));
            std::fs::write(&output, &bytes)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("exported {} bytes to {}", bytes.len(), output.display());
        }
        Commands::Write {
            image,
            file,
            from,
            kind,
            reclen,
        } => {
            let mut img = load_image(&image, &config)?;
            let bytes = std::fs::read(&from)
                .with_context(|| format!("failed to read {}", from.display()))?;
            let data = build_file_data(&kind, reclen, bytes)?;
            img.write_file(&file, &data)?;
            img.save()?;
            println!("stored {}", file.to_uppercase());
        }
        Commands::Rename { image, old, new } => {
            let mut img = load_image(&image, &config)?;
            img.rename_file(&old, &new)?;
            img.save()?;
            println!("renamed {} to {}", old.to_uppercase(), new.to_uppercase());
        }
        Commands::Del { image, file, safe } => {
            let mut img = load_image(&image, &config)?;
            img.delete_file(&file, safe)?;
            img.save()?;
            println!("deleted {}", file.to_uppercase());
        }
        Commands::Volname { image, name } => {
            let mut img = load_image(&image, &config)?;
            img.set_volume_name(&name)?;
            img.save()?;
            println!("volume renamed to {}", name.to_uppercase());
        }
        Commands::Check { image } => {
            let img = load_image(&image, &config)?;
            let report = img.check()?;
            println!("health: {}", health_label(report.health));
            for result in &report.results {
                println!(
                    "  {:<24} {}",
                    result.checker,
                    health_label(result.health)
                );
                for issue in &result.issues {
                    println!("    - {}", issue.message);
                }
            }
            if report.health == Health::Broken {
                std::process::exit(2);
            }
        }
        Commands::Repair { image, apply } => {
            let mut img = load_image(&image, &config)?;
            if apply {
                let outcome = img.repair()?;
                img.save()?;
                for action in &outcome.applied {
                    println!("applied: {:?}", action);
                }
                println!("health after repair: {}", health_label(outcome.health_after));
            } else {
                let plan = img.repair_plan()?;
                println!("status: {:?}", plan.status);
                for issue in &plan.issues {
                    println!("  issue: {}", issue.message);
                }
                for action in &plan.actions {
                    println!("  would apply: {:?}", action);
                }
                if plan.status == RepairStatus::Unsafe {
                    println!("no safe repair available, manual intervention needed");
                }
            }
        }
        Commands::Info { image } => {
            let img = load_image(&image, &config)?;
            let geometry = img.geometry();
            println!("image:    {}", image.display());
            println!("volume:   {}", img.volume_name()?);
            match img.preset() {
                Some(preset) => println!("format:   {}", preset),
                None => println!("format:   custom"),
            }
            println!(
                "layout:   {} sides x {} tracks x {} sectors ({} sectors, {} per cluster)",
                geometry.sides,
                geometry.tracks_per_side,
                geometry.sectors_per_track,
                geometry.total_sectors(),
                geometry.sectors_per_cluster
            );
            let abm = img.abm()?;
            println!(
                "usage:    {} of {} units allocated",
                abm.used_units(),
                abm.total_units()
            );
        }
    }
    Ok(())
}

/// Open an image, falling back to the configured custom geometries when the
/// built-in detection does not recognize it.
fn load_image(path: &Path, config: &Config) -> Result<DskImage> {
    match DskImage::load(path) {
        Ok(img) => Ok(img),
        Err(DskError::UnrecognizedGeometry(len)) => {
            let geometry = config
                .geometry_for_len(len)
                .with_context(|| format!("no known geometry for {} byte image", len))?;
            Ok(DskImage::load_with_geometry(path, geometry)?)
        }
        Err(e) => Err(e.into()),
    }
}

fn build_file_data(kind: &str, reclen: Option<u8>, bytes: Vec<u8>) -> Result<FileData> {
    let kind = kind.to_ascii_uppercase();
    let file_type = match kind.as_str() {
        "PROGRAM" | "PGM" => return Ok(FileData::Program(bytes)),
        "DIS/FIX" => FileType::DisFix,
        "DIS/VAR" => FileType::DisVar,
        "INT/FIX" => FileType::IntFix,
        "INT/VAR" => FileType::IntVar,
        _ => bail!("unknown file type {}", kind),
    };
    let record_length = reclen.unwrap_or(80);
    if file_type.is_variable() {
        // variable records come from line-oriented host text
        let mut records: Vec<Vec<u8>> = bytes
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
            .collect();
        if records.last().is_some_and(|r| r.is_empty()) {
            records.pop();
        }
        Ok(FileData::Records {
            file_type,
            record_length,
            records,
        })
    } else {
        Ok(FileData::fixed_from_bytes(file_type, record_length, &bytes)?)
    }
}

fn print_catalog(img: &DskImage) -> Result<()> {
    println!(
        "Volume {}  ({})",
        img.volume_name()?,
        img.preset()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "custom".to_string())
    );
    println!("{:<12} {:<12} {:>8} {:>8}  {}", "Name", "Type", "Size", "Sectors", "Modified");
    for entry in img.list_files()? {
        println!(
            "{:<12} {:<12} {:>8} {:>8}  {}{}",
            entry.name,
            type_label(&entry),
            entry.size_bytes,
            entry.sectors,
            entry
                .updated_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
            if entry.protected { "  P" } else { "" },
        );
    }
    Ok(())
}

fn type_label(entry: &FileEntry) -> String {
    match entry.file_type {
        Some(FileType::Program) => "PROGRAM".to_string(),
        Some(FileType::DisFix) => format!("DIS/FIX {}", entry.record_length),
        Some(FileType::DisVar) => format!("DIS/VAR {}", entry.record_length),
        Some(FileType::IntFix) => format!("INT/FIX {}", entry.record_length),
        Some(FileType::IntVar) => format!("INT/VAR {}", entry.record_length),
        None => "UNKNOWN".to_string(),
    }
}

fn health_label(health: Health) -> &'static str {
    match health {
        Health::Good => "GOOD",
        Health::Warn => "WARN",
        Health::Broken => "BROKEN",
    }
}
