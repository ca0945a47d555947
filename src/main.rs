use clap::{Args, CommandFactory, Parser, Subcommand};
use log::{error, info, Level};
use md1img::backup::create_backup;
use md1img::{CompressionFormat, LogLevel, Md1Error, Md1Image, Md1ImgConfig, Md1Packer, Md1Unpacker};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "md1img", version, about = "Unpack, list and repack MediaTek md1img modem images")]
struct Cli {
    /// Export the default configuration to FILE and exit
    #[arg(long, value_name = "FILE")]
    export_config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack an md1img image into a directory
    Unpack {
        image: PathBuf,
        /// Output directory (default: image path without extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Pack a directory of numbered files into an md1img image
    Pack {
        directory: PathBuf,
        /// Output image (default: <directory>-new.img)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Default compression for files without a mapping entry: none, gzip, xz
        #[arg(long)]
        compression: Option<CompressionFormat>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// List the entries of an md1img image
    List {
        image: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
}

impl Commands {
    fn common(&self) -> &CommonArgs {
        match self {
            Commands::Unpack { common, .. }
            | Commands::Pack { common, .. }
            | Commands::List { common, .. } => common,
        }
    }
}

#[derive(Args)]
struct CommonArgs {
    /// Configuration file (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Report what would be done without writing anything
    #[arg(long)]
    dry_run: bool,
    /// Back up the image before touching it
    #[arg(long)]
    backup: bool,
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,
    /// DEBUG, INFO, WARNING, ERROR or CRITICAL
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,
    /// Also write log records to FILE
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
    /// Fail when the image carries no md1_file_map
    #[arg(long)]
    strict: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(path) = cli.export_config {
        return export_config(&path);
    }
    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };

    let config = match load_config(&command) {
        Ok(c)  => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(config.log_level, command.common().log_file.as_deref());
    info!("MD1 Image Tool - version {}", env!("CARGO_PKG_VERSION"));

    match run(command, &config) {
        Ok(())  => ExitCode::SUCCESS,
        Err(e)  => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, config: &Md1ImgConfig) -> Result<(), Md1Error> {
    match command {

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { image, output, .. } => {
            let output_dir = output.unwrap_or_else(|| image.with_extension(""));

            if config.backup && !config.dry_run {
                let backup_path = create_backup(&image, config.backup_dir.as_deref())?;
                info!("Created backup at {}", backup_path.display());
            }

            let unpacker = Md1Unpacker::open(&image, config.strict_mapping)?;
            if config.dry_run {
                info!("Dry run: would unpack {} to {}", image.display(), output_dir.display());
                return Ok(());
            }

            let extracted = unpacker.unpack(&output_dir)?;
            info!("Successfully unpacked {} files to {}", extracted.len(), output_dir.display());
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { directory, output, .. } => {
            let output_file = output.unwrap_or_else(|| default_pack_output(&directory));

            let mut packer = Md1Packer::new(config.clone());
            packer.add_directory(&directory)?;

            if config.dry_run {
                info!("Dry run: would pack {} to {}", directory.display(), output_file.display());
                return Ok(());
            }

            let result = packer.pack(&output_file)?;
            info!("Successfully packed to {}", result.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { image, .. } => {
            let image_model = Md1Image::open_with(&image, config.strict_mapping)?;
            list_files(&image, image_model, config.verbose);
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// Config file first, then any flag given on the command line on top.
fn load_config(command: &Commands) -> Result<Md1ImgConfig, Md1Error> {
    let common = command.common();
    let mut config = match &common.config {
        Some(path) => Md1ImgConfig::from_file(path)?,
        None       => Md1ImgConfig::default(),
    };

    if let Some(level) = common.log_level { config.log_level = level; }
    if common.backup { config.backup = true; }
    if let Some(dir) = &common.backup_dir { config.backup_dir = Some(dir.clone()); }
    if common.dry_run { config.dry_run = true; }
    if common.verbose { config.verbose = true; }
    if common.strict { config.strict_mapping = true; }
    if let Commands::Pack { compression: Some(c), .. } = command {
        config.compression_format = *c;
    }
    Ok(config)
}

fn default_pack_output(directory: &Path) -> PathBuf {
    let stem = directory.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    directory
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{stem}-new.img"))
}

fn export_config(path: &Path) -> ExitCode {
    match Md1ImgConfig::default().save(path) {
        Ok(()) => {
            println!("Configuration exported to {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error exporting configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

fn list_files(path: &Path, image: Md1Image, verbose: bool) {
    let unpacker = Md1Unpacker::new(image);
    let files = unpacker.list_files();
    if files.is_empty() {
        println!("No files found in image.");
        return;
    }

    println!("\nFiles in MD1 image: {}", path.display());
    println!("{}", "-".repeat(78));
    println!("{:<4} {:<20} {:<20} {:<10} {:<10} {:<10}",
             "#", "Name", "Mapped Name", "Size", "Base", "Compression");
    println!("{}", "-".repeat(78));
    for info in &files {
        println!("{:<4} {:<20} {:<20} {:<10} {:<10} {:<10}",
            info.index,
            info.name,
            info.mapped_name.as_deref().unwrap_or("Unknown"),
            info.size,
            format!("0x{:08x}", info.base),
            info.compression);
        if verbose {
            if let Some(file) = unpacker.image().get_file_by_name(&info.name) {
                println!("{}\n", file.header);
            }
        }
    }
    println!("{}", "-".repeat(78));
    println!("Total: {} files", files.len());
}

/// Copies every log record to stderr and to a log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn setup_logging(level: LogLevel, log_file: Option<&Path>) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level.to_level_filter())
        .format(|buf, record| {
            let level = match record.level() {
                Level::Warn => "WARNING",
                other       => other.as_str(),
            };
            writeln!(buf, "[{level}] {}", record.args())
        });

    if let Some(path) = log_file {
        match File::create(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
            }
            Err(e) => eprintln!("Warning: Could not create log file ({e})"),
        }
    }
    let _ = builder.try_init();
}
