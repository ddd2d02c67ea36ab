use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use file_storage::{parse_byte_size, LocalUpload, Namespace};
use std::path::{Path, PathBuf};
use thumbnail_cache::{ImageStorage, PictureLink, ResizeFlags, ThumbnailRequest};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

#[derive(Parser, Debug)]
#[command(name = "image-storage")]
#[command(about = "Namespaced image storage with an on-disk thumbnail cache")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Namespace to work in, e.g. `users/42` (defaults to the configured one)
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Move a received upload into the store and render preset sizes
    Save {
        /// Spooled upload file
        file: PathBuf,
        /// Stored file name (defaults to the upload's stem with a sniffed extension)
        #[arg(long)]
        name: Option<String>,
        /// Replace an existing picture and drop its cached variants
        #[arg(long)]
        overwrite: bool,
    },

    /// Copy a local image into the store and render preset sizes
    Copy {
        source: PathBuf,
        /// Stored file name (defaults to the source file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Copy every file of a directory into the store in parallel
    Batch { directory: PathBuf },

    /// Print the public link of a picture, rendering the variant if needed
    Link {
        /// Stored file name, e.g. `a.png`
        picture: String,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Resize flags, e.g. `fill|shrink_only` or `exact`
        #[arg(long)]
        flags: Option<String>,
        /// JPEG quality (1-100)
        #[arg(long)]
        quality: Option<u8>,
        /// Append a timestamp so browsers refetch the file
        #[arg(long)]
        bypass_cache: bool,
    },

    /// Delete a picture and all of its cached variants
    Delete { picture: String },

    /// Drop the cached variants of a picture, keeping the original
    Invalidate {
        /// Picture name without extension
        name: String,
    },

    /// Convert a human size such as `8M` into bytes
    Bytes { size: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Bytes { size } = &cli.command {
        let bytes = parse_byte_size(size).ok_or_else(|| anyhow!("Unrecognised size: {}", size))?;
        println!("{}", bytes);
        return Ok(());
    }

    let config = config::load(&cli.config)?;
    let storage = ImageStorage::from_config(&config).context("Failed to set up image storage")?;
    let namespace = cli
        .namespace
        .filter(|namespace| !namespace.is_empty())
        .map(Namespace::from);
    let namespace = namespace.as_ref();

    match cli.command {
        Commands::Save {
            file,
            name,
            overwrite,
        } => save(&storage, &file, name, overwrite, namespace),
        Commands::Copy { source, name } => {
            let name = match name {
                Some(name) => name,
                None => file_name(&source)?,
            };
            storage
                .copy(&source, &name, namespace)
                .with_context(|| format!("Failed to copy {}", source.display()))?;
            println!("Stored {}", name);
            Ok(())
        }
        Commands::Batch { directory } => batch(&storage, &directory, namespace),
        Commands::Link {
            picture,
            width,
            height,
            flags,
            quality,
            bypass_cache,
        } => {
            let mut request = ThumbnailRequest {
                width,
                height,
                flags: flags.as_deref().map(str::parse::<ResizeFlags>).transpose()?,
                quality,
                bypass_browser_cache: false,
            };
            if bypass_cache {
                request = request.bypass_browser_cache();
            }

            let namespace = match namespace {
                Some(namespace) => namespace,
                None => storage.default_namespace()?,
            };
            match storage.picture_link(namespace, &picture, None, &request)? {
                PictureLink::Available(link) => println!("{}", link),
                PictureLink::Unavailable => eprintln!("No picture available for {}", picture),
            }
            Ok(())
        }
        Commands::Delete { picture } => {
            storage
                .delete_picture(&picture, None, namespace)
                .with_context(|| format!("Failed to delete {}", picture))?;
            println!("Deleted {}", picture);
            Ok(())
        }
        Commands::Invalidate { name } => {
            if storage.invalidate(&name, namespace)? {
                println!("Cleared cached variants of {}", name);
                Ok(())
            } else {
                Err(anyhow!("Some cached variants of {} could not be removed", name))
            }
        }
        Commands::Bytes { .. } => Ok(()),
    }
}

fn save(
    storage: &ImageStorage,
    file: &Path,
    name: Option<String>,
    overwrite: bool,
    namespace: Option<&Namespace>,
) -> Result<()> {
    let declared = file_name(file)?;
    let mut upload = LocalUpload::new(file, declared.as_str())
        .with_context(|| format!("Failed to read upload {}", file.display()))?;

    let name = match name {
        Some(name) => name,
        None => {
            let stem = file
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| anyhow!("Invalid file name: {}", file.display()))?;
            format!("{}.{}", stem, storage.image_extension(&upload)?)
        }
    };

    storage
        .save(&mut upload, &name, overwrite, namespace)
        .with_context(|| format!("Failed to save {}", file.display()))?;
    println!("Stored {}", name);
    Ok(())
}

fn batch(storage: &ImageStorage, directory: &Path, namespace: Option<&Namespace>) -> Result<()> {
    if !directory.is_dir() {
        return Err(anyhow!("Path is not a directory: {}", directory.display()));
    }

    let mut sources = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_file() {
            sources.push(path);
        }
    }
    sources.sort();
    info!("Copying {} files from {}", sources.len(), directory.display());

    let results = storage.copy_batch(&sources, namespace, |current, total| {
        info!("Progress: {}/{}", current, total);
    });

    let mut failed = 0;
    for source in &sources {
        match results.get(source) {
            Some(Ok(())) => println!("Stored {}", source.display()),
            Some(Err(e)) => {
                failed += 1;
                eprintln!("Failed {}: {}", source.display(), e);
            }
            None => {}
        }
    }

    println!("{} stored, {} failed", sources.len() - failed, failed);
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid file name: {}", path.display()))
}
