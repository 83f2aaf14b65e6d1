//! Thin command-line front end over the bag engine.

use anyhow::{bail, Context, Result};
use bagit::{create_bag, open_bag, Algorithm, CreateOptions, TagFile};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bagit")]
#[command(about = "Create and validate BagIt packages")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a bag's completeness and checksums
    Validate {
        /// Bag directory
        path: PathBuf,
        /// Number of checksum workers
        #[arg(short = 'p', long = "procs", default_value_t = 1)]
        procs: usize,
        /// Print every defect found
        #[arg(short, long)]
        verbose: bool,
    },
    /// Package a directory as a bag
    Create {
        /// Source directory
        path: PathBuf,
        /// Number of checksum workers
        #[arg(short = 'p', long = "procs", default_value_t = 1)]
        procs: usize,
        /// Destination directory (defaults to bagging in place)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Checksum algorithm, repeatable (default: sha512)
        #[arg(short = 'a', long = "algs")]
        algs: Vec<String>,
        /// `Label: value` tag for bag-info.txt, repeatable
        #[arg(short = 't', long = "tag")]
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Validate {
            path,
            procs,
            verbose,
        } => {
            let bag = open_bag(&path)
                .await
                .with_context(|| format!("could not open bag at {}", path.display()))?;
            let mut defects = 0usize;
            let valid = bag
                .validate(procs, &mut |err| {
                    defects += 1;
                    if verbose {
                        eprintln!("{err}");
                    }
                })
                .await;
            if !valid {
                bail!("{} is not valid ({} defects)", path.display(), defects);
            }
            println!("{} is valid", path.display());
        }
        Commands::Create {
            path,
            procs,
            output,
            algs,
            tags,
        } => {
            let algorithms = if algs.is_empty() {
                vec![Algorithm::Sha512]
            } else {
                algs.iter()
                    .map(|name| Algorithm::from_str(name))
                    .collect::<Result<_, _>>()?
            };
            let mut info = TagFile::new();
            for tag in &tags {
                let parsed =
                    TagFile::parse(tag).with_context(|| format!("invalid tag `{tag}`"))?;
                for (label, value) in parsed.tags() {
                    info.append(label, value);
                }
            }
            let destination = match &output {
                Some(dst) => format!("under {}", dst.display()),
                None => format!("at {}", path.display()),
            };
            let opts = CreateOptions {
                dst_path: output,
                algorithms,
                info,
                workers: procs,
                ..CreateOptions::new(&path)
            };
            create_bag(opts).await?;
            println!("created bag {destination}");
        }
    }
    Ok(())
}
