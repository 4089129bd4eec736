use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facegroup::{
    build_face_database, cluster_faces, export_best_images, select_best_images, BuildOptions,
    ClusterOptions, ClusterPick, FaceEncoder,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Defaults for every stage, loadable from a JSON file.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
struct PipelineConfig {
    build: BuildOptions,
    cluster: ClusterOptions,
}

#[derive(Parser, Debug)]
#[command(name = "facegroup", version, about = "Group face photos by person")]
struct Cli {
    /// JSON file with `build` and `cluster` defaults; flags override it
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Embed the faces of a directory into a new face database
    Build {
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Cluster a face database into one directory per person
    Cluster {
        /// Face database directory created by `build`
        #[arg(short, long, value_name = "DIR")]
        database: PathBuf,
        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Pick the sharpest image of every cluster
    Best {
        /// Result directory created by `cluster`
        #[arg(short, long, value_name = "DIR")]
        results: PathBuf,
        /// Copy the picks into this directory as `<label>.jpg`
        #[arg(long, value_name = "DIR")]
        export: Option<PathBuf>,
    },

    /// Build, cluster and pick best images in one go
    Run {
        #[command(flatten)]
        build: BuildArgs,
        #[command(flatten)]
        cluster: ClusterArgs,
        /// Copy the picks into this directory as `<label>.jpg`
        #[arg(long, value_name = "DIR")]
        export: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Directory of face images
    #[arg(short, long, value_name = "DIR")]
    input: PathBuf,
    /// Where the face database directory is created (default: current directory)
    #[arg(long, value_name = "DIR")]
    output_root: Option<PathBuf>,
    /// Skip images whose blur score is below the threshold
    #[arg(long)]
    remove_blurry: bool,
    /// Blur score below which an image counts as blurry
    #[arg(long, value_name = "SCORE")]
    blur_threshold: Option<f64>,
    /// Hide per-image progress
    #[arg(short, long)]
    quiet: bool,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// UltraFace face detector model (.onnx)
    #[arg(long, value_name = "FILE")]
    detector: Option<PathBuf>,
    /// ArcFace face recognizer model (.onnx)
    #[arg(long, value_name = "FILE")]
    recognizer: Option<PathBuf>,
    /// Minimum detector confidence for a face
    #[arg(long, value_name = "SCORE")]
    face_confidence: Option<f32>,
}

#[derive(Args, Debug)]
struct ClusterArgs {
    /// Neighbourhood radius in embedding space
    #[arg(long, value_name = "EPS")]
    eps: Option<f32>,
    /// Faces (self included) needed to seed a cluster
    #[arg(long, value_name = "N")]
    min_samples: Option<usize>,
    /// Worker threads for clustering (default: all cores)
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,
    /// Do not write the noise group (`-1`) to the results
    #[arg(long)]
    skip_noise: bool,
}

impl BuildArgs {
    fn options(&self, mut options: BuildOptions) -> BuildOptions {
        if let Some(root) = &self.output_root {
            options.output_root = root.clone();
        }
        if self.remove_blurry {
            options.remove_blurry = true;
        }
        if let Some(threshold) = self.blur_threshold {
            options.blur_threshold = threshold;
        }
        if self.quiet {
            options.verbose = false;
        }
        options
    }
}

impl ClusterArgs {
    fn options(&self, mut options: ClusterOptions) -> ClusterOptions {
        if let Some(eps) = self.eps {
            options.eps = eps;
        }
        if let Some(min_samples) = self.min_samples {
            options.min_samples = min_samples;
        }
        if self.jobs.is_some() {
            options.jobs = self.jobs;
        }
        if self.skip_noise {
            options.write_noise = false;
        }
        options
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Build { build } => {
            run_build(&build, config.build)?;
        }

        Commands::Cluster { database, cluster } => {
            run_cluster(&database, &cluster.options(config.cluster))?;
        }

        Commands::Best { results, export } => {
            run_best(&results, export.as_deref())?;
        }

        Commands::Run {
            build,
            cluster,
            export,
        } => {
            let db_dir = run_build(&build, config.build)?;
            let result_dir = run_cluster(&db_dir, &cluster.options(config.cluster))?;
            run_best(&result_dir, export.as_deref())?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let file =
        File::open(path).with_context(|| format!("Could not open config file {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid config file {:?}", path))
}

fn run_build(args: &BuildArgs, defaults: BuildOptions) -> Result<PathBuf> {
    let options = args.options(defaults);
    let encoder = load_encoder(&args.models)?;

    println!("▶ Building face database from: {}", args.input.display());
    let db = benchmark("building face database", || {
        build_face_database(&args.input, &options, &*encoder)
    })
    .with_context(|| format!("Failed to build face database from {:?}", args.input))?;

    println!(
        "✅ Stored {} face(s) in {}",
        db.records,
        db.dir.display()
    );
    Ok(db.dir)
}

fn run_cluster(database: &Path, options: &ClusterOptions) -> Result<PathBuf> {
    println!("▶ Clustering faces in: {}", database.display());
    let summary = benchmark("clustering", || cluster_faces(database, options))
        .with_context(|| format!("Failed to cluster face database {:?}", database))?;

    println!("unique faces found: {}", summary.unique_faces);
    println!(
        "✅ Cluster has been stored in \"{}\" directory",
        summary.result_dir.display()
    );
    Ok(summary.result_dir)
}

fn run_best(results: &Path, export: Option<&Path>) -> Result<()> {
    println!("▶ Picking best image per cluster in: {}", results.display());
    let picks = select_best_images(results)
        .with_context(|| format!("Failed to read clusters in {:?}", results))?;
    print_picks(&picks);

    if let Some(dest) = export {
        let written = export_best_images(&picks, dest)
            .with_context(|| format!("Failed to export best images to {:?}", dest))?;
        println!(
            "✅ Exported {} best image(s) to {}",
            written.len(),
            dest.display()
        );
    }
    Ok(())
}

fn print_picks(picks: &[ClusterPick]) {
    if picks.is_empty() {
        println!("No clusters found.");
        return;
    }
    for pick in picks {
        match &pick.best {
            Some(best) => println!(
                "   🏆 Face {} → {} (sharpness {:.1})",
                pick.label,
                best.path.display(),
                best.score
            ),
            None => println!("   ⚠️  Face {} has no usable image", pick.label),
        }
    }
}

#[cfg(feature = "onnx")]
fn load_encoder(models: &ModelArgs) -> Result<Box<dyn FaceEncoder>> {
    use facegroup::encoder::{OnnxFaceEncoder, OnnxOptions};

    let detector = models
        .detector
        .as_ref()
        .context("--detector is required to compute face embeddings")?;
    let recognizer = models
        .recognizer
        .as_ref()
        .context("--recognizer is required to compute face embeddings")?;

    let mut options = OnnxOptions::default();
    if let Some(confidence) = models.face_confidence {
        options.confidence_threshold = confidence;
    }
    Ok(Box::new(OnnxFaceEncoder::from_files(
        detector, recognizer, options,
    )?))
}

#[cfg(not(feature = "onnx"))]
fn load_encoder(_models: &ModelArgs) -> Result<Box<dyn FaceEncoder>> {
    anyhow::bail!(
        "facegroup was built without the `onnx` feature; rebuild with `--features onnx` to compute face embeddings"
    )
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
