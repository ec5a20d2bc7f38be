use std::path::PathBuf;
use anyhow::Context;
use burn::prelude::{Config, Device};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use serde::Serialize;
use simple_logger::SimpleLogger;
use breed_cam::{BreedCatalog, BreedInfo, Classifier, ClassifyError, ServiceConfig};

#[cfg(not(feature = "tch"))]
type Backend = burn::backend::Autodiff<burn::backend::NdArray>;
#[cfg(feature = "tch")]
type Backend = burn::backend::Autodiff<burn_tch::LibTorch>;

#[derive(Parser)]
#[command(name = "breed-cam", about = "Cattle and buffalo breed classification with Grad-CAM explanations")]
struct Arguments {
	#[arg(short, long)]
	verbose: bool,
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Classify one or more images and print a JSON report for each
	Classify {
		#[arg(short, long, default_value = "service.json")]
		config: PathBuf,
		#[arg(required = true)]
		images: Vec<PathBuf>,
	},
	/// Write a default service configuration
	InitConfig {
		#[arg(short, long)]
		weights: String,
		#[arg(short, long)]
		classes: String,
		#[arg(short, long, default_value = "service.json")]
		out: PathBuf,
	},
}

#[derive(Serialize)]
struct Report<'a> {
	breed: &'a str,
	confidence: f64,
	info: &'a BreedInfo,
	#[serde(skip_serializing_if = "Option::is_none")]
	gradcam: Option<&'a str>,
}

#[derive(Serialize)]
struct Failure {
	error: String,
}

fn main() -> anyhow::Result<()> {
	let arguments = Arguments::parse();
	let level = if arguments.verbose { LevelFilter::Debug } else { LevelFilter::Info };
	SimpleLogger::new().with_level(level).init()?;

	match arguments.command {
		Command::Classify { config, images } => classify(config, images),
		Command::InitConfig { weights, classes, out } => init_config(weights, classes, out),
	}
}

fn init_config(weights: String, classes: String, out: PathBuf) -> anyhow::Result<()> {
	ServiceConfig::new(weights, classes)
		.save(&out)
		.with_context(|| format!("Could not write {}", out.display()))?;
	log::info!("Wrote {}", out.display());
	Ok(())
}

fn classify(config: PathBuf, images: Vec<PathBuf>) -> anyhow::Result<()> {
	let config = ServiceConfig::load(&config).with_context(|| format!("Could not read {}", config.display()))?;
	let catalog = match &config.breed_info_path {
		Some(path) => BreedCatalog::load(path)?,
		None => BreedCatalog::default(),
	};

	let classifier = Classifier::<Backend>::from_config(&config, &device())?;

	for image in images {
		let line = match classifier.classify_file(&image) {
			Ok(result) => {
				let info = catalog.lookup(&result.breed);
				serde_json::to_string(&Report {
					breed: &result.breed,
					confidence: (result.confidence as f64 * 10_000.0).round() / 10_000.0,
					info: &info,
					gradcam: result.explanation_image.as_deref(),
				})?
			}
			Err(err @ (ClassifyError::Input(_) | ClassifyError::Io(_))) => {
				log::warn!("Skipping {}: {err}", image.display());
				serde_json::to_string(&Failure { error: err.to_string() })?
			}
			Err(err) => return Err(err).with_context(|| format!("Classifying {}", image.display())),
		};
		println!("{line}");
	}

	Ok(())
}

#[cfg(not(feature = "tch"))]
fn device() -> Device<Backend> {
	Default::default()
}

#[cfg(feature = "tch")]
fn device() -> Device<Backend> {
	if tch::utils::has_cuda() {
		burn_tch::LibTorchDevice::Cuda(0)
	} else {
		log::info!("CUDA not available, running on CPU");
		burn_tch::LibTorchDevice::Cpu
	}
}
