//! Velocity Channel Analysis Command-Line Interface
//!
//! This CLI provides tools for:
//! - Generating synthetic power-law cubes
//! - Running the VCA estimator on a cube and reporting the fitted index
//! - Computing the distance between two cubes
//! - Printing and checking configuration files

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use vca_core::config::VcaConfig;
use vca_core::cube::{Beam, SpectralCube};
use vca_core::distance::{DistanceInput, VcaDistance};
use vca_core::logging::{init_logging, LogLevel};
use vca_core::prelude::*;

#[derive(Parser)]
#[command(name = "vca")]
#[command(author, version, about = "Velocity Channel Analysis CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (defaults to the search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic power-law cube
    Synth {
        /// Output file (JSON)
        #[arg(short, long, default_value = "cube.json")]
        output: PathBuf,

        /// Number of channels
        #[arg(long, default_value = "10")]
        channels: usize,

        /// Image size in pixels
        #[arg(long, default_value = "128")]
        size: usize,

        /// Power-law index (the spectrum falls as k^-index)
        #[arg(long, default_value = "3.0")]
        index: f64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Minor-to-major axis ratio of the anisotropy
        #[arg(long, default_value = "1.0")]
        ellipticity: f64,

        /// Orientation of the anisotropy in degrees
        #[arg(long, default_value = "0.0")]
        theta: f64,

        /// White-noise standard deviation
        #[arg(long, default_value = "0.0")]
        noise: f64,

        /// Pixel scale in arcseconds
        #[arg(long)]
        pixel_scale: Option<f64>,

        /// Circular beam FWHM in arcseconds (needs --pixel-scale)
        #[arg(long)]
        beam: Option<f64>,
    },

    /// Run the estimator on a cube
    Run {
        /// Input cube (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Lower fit cutoff in cycles/pixel
        #[arg(long)]
        low_cut: Option<f64>,

        /// Upper fit cutoff in cycles/pixel
        #[arg(long)]
        high_cut: Option<f64>,

        /// Regrid target, e.g. "2 channels" or "0.4 km/s"
        #[arg(long)]
        channel_width: Option<ChannelWidth>,

        /// Apodization kernel (none, hanning, cosinebell, splitcosinebell, tukey)
        #[arg(long)]
        apodize: Option<String>,

        /// Kernel alpha
        #[arg(long, default_value = "0.3")]
        alpha: f64,

        /// Kernel beta (split cosine bell)
        #[arg(long, default_value = "0.6")]
        beta: f64,

        /// Divide out the beam response
        #[arg(long)]
        beam_correct: bool,

        /// Weighted 1D fit
        #[arg(long)]
        weighted: bool,

        /// Skip the 2D fit
        #[arg(long)]
        no_2d: bool,

        /// Save results to this file (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Include the cube in the saved results
        #[arg(long)]
        keep_data: bool,

        /// Print the radial profile
        #[arg(long)]
        profile: bool,
    },

    /// Distance between two cubes
    Distance {
        /// First cube (JSON)
        cube1: PathBuf,

        /// Second cube (JSON)
        cube2: PathBuf,

        /// Lower fit cutoff in cycles/pixel
        #[arg(long)]
        low_cut: Option<f64>,

        /// Upper fit cutoff in cycles/pixel
        #[arg(long)]
        high_cut: Option<f64>,

        /// Regrid target for the first cube
        #[arg(long)]
        width1: Option<ChannelWidth>,

        /// Regrid target for the second cube
        #[arg(long)]
        width2: Option<ChannelWidth>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print an example configuration
    Example,
    /// Print the effective configuration
    Show,
    /// Check a configuration file
    Check {
        /// File to check
        path: PathBuf,
    },
    /// List the configuration search path
    Paths,
}

fn load_config(path: Option<&Path>) -> Result<VcaConfig> {
    match path {
        Some(p) => VcaConfig::load_from(p)
            .with_context(|| format!("failed to load configuration from {}", p.display())),
        None => VcaConfig::load().context("failed to load configuration"),
    }
}

fn load_cube(path: &Path) -> Result<SpectralCube> {
    SpectralCube::load_json(path).with_context(|| format!("failed to read cube {}", path.display()))
}

fn apply_cutoffs(config: &mut RunConfig, low_cut: Option<f64>, high_cut: Option<f64>) {
    if let Some(low) = low_cut {
        config.low_cut = Some(FrequencyQuantity::per_pixel(low));
    }
    if let Some(high) = high_cut {
        config.high_cut = Some(FrequencyQuantity::per_pixel(high));
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_synth(
    output: PathBuf,
    channels: usize,
    size: usize,
    index: f64,
    seed: u64,
    ellipticity: f64,
    theta: f64,
    noise: f64,
    pixel_scale: Option<f64>,
    beam: Option<f64>,
) -> Result<()> {
    let mut synth = SyntheticConfig::new(channels, size, index)
        .with_seed(seed)
        .with_ellipse(ellipticity, theta)
        .with_noise(noise);
    if let Some(arcsec) = pixel_scale {
        synth = synth.with_pixel_scale(arcsec / 3600.0);
    }
    if let Some(fwhm) = beam {
        if pixel_scale.is_none() {
            bail!("--beam needs --pixel-scale");
        }
        synth = synth.with_beam(Beam::circular(fwhm / 3600.0));
    }

    let cube = synth.generate().context("failed to generate cube")?;
    cube.save_json(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "Wrote {}x{}x{} cube (index {}) to {}",
        channels,
        size,
        size,
        index,
        output.display()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    mut config: VcaConfig,
    input: PathBuf,
    low_cut: Option<f64>,
    high_cut: Option<f64>,
    channel_width: Option<ChannelWidth>,
    apodize: Option<String>,
    alpha: f64,
    beta: f64,
    beam_correct: bool,
    weighted: bool,
    no_2d: bool,
    output: Option<PathBuf>,
    keep_data: bool,
    profile: bool,
) -> Result<()> {
    apply_cutoffs(&mut config.run, low_cut, high_cut);
    if channel_width.is_some() {
        config.channel_width = channel_width;
    }
    if let Some(name) = apodize {
        config.run.apodize = ApodizationKernel::from_name(&name, alpha, beta)?;
    }
    config.run.beam_correct |= beam_correct;
    config.run.fit.weighted |= weighted;
    if no_2d {
        config.run.fit_2d = false;
    }
    config.validate().context("invalid options")?;

    let cube = load_cube(&input)?;
    let (nchan, height, width) = cube.shape();
    info!(nchan, height, width, "Loaded cube");

    let vca = config.estimator(cube)?;
    let run = vca.run(&config.run).context("VCA run failed")?;

    println!("=== VCA ===");
    println!("Cube: {} channels, {}x{}", vca.cube().num_channels(), height, width);
    println!(
        "Fit range: [{:.4}, {:.4}] cycles/pixel ({} points)",
        run.fit.low_cut, run.fit.high_cut, run.fit.n_points
    );
    println!("Slope: {:.4} +/- {:.4}", run.fit.slope, run.fit.slope_err);
    if let Some(bp) = run.fit.breakpoint {
        println!(
            "Break: {:.4} +/- {:.4} cycles/pixel, slope above {:.4} +/- {:.4}",
            bp.frequency, bp.frequency_err, bp.slope_above, bp.slope_above_err
        );
    }
    if let Some(fit) = run.fit_2d {
        println!("2D slope: {:.4} +/- {:.4}", fit.slope, fit.slope_err);
    }

    if profile {
        println!();
        println!("{:>12} {:>14} {:>14} {:>8}", "freq", "power", "error", "count");
        for bin in run.ps1d.iter() {
            let err = bin
                .error
                .map(|e| format!("{:.6e}", e))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:>12.6} {:>14.6e} {:>14} {:>8}",
                bin.frequency, bin.power, err, bin.count
            );
        }
    }

    if let Some(path) = output {
        vca.save_results(&run, &path, keep_data)
            .with_context(|| format!("failed to save results to {}", path.display()))?;
        println!("Results saved to {}", path.display());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_distance(
    mut config: VcaConfig,
    cube1: PathBuf,
    cube2: PathBuf,
    low_cut: Option<f64>,
    high_cut: Option<f64>,
    width1: Option<ChannelWidth>,
    width2: Option<ChannelWidth>,
    json: bool,
) -> Result<()> {
    apply_cutoffs(&mut config.run, low_cut, high_cut);
    config.validate().context("invalid options")?;

    let input = |path: &Path, width: Option<ChannelWidth>| -> Result<DistanceInput> {
        let mut input = DistanceInput::new(load_cube(path)?).with_config(config.run.clone());
        if let Some(w) = width.or(config.channel_width) {
            input = input.with_channel_width(w);
        }
        if let Some(d) = config.distance {
            input = input.with_distance(d);
        }
        Ok(input)
    };
    let input1 = input(&cube1, width1)?;
    let input2 = input(&cube2, width2)?;

    let comparison = VcaDistance::compute(&input1, &input2).context("VCA distance failed")?;
    let result = comparison.distance_metric();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Slope 1: {:.4} +/- {:.4}",
            result.fit1.slope, result.fit1.slope_err
        );
        println!(
            "Slope 2: {:.4} +/- {:.4}",
            result.fit2.slope, result.fit2.slope_err
        );
        println!("Distance: {:.4}", result.distance);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Example => print!("{}", VcaConfig::example_yaml()),
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            print!("{}", config.to_yaml()?);
        }
        ConfigAction::Check { path } => {
            VcaConfig::load_from(&path)
                .with_context(|| format!("{} is not a valid configuration", path.display()))?;
            println!("{}: OK", path.display());
        }
        ConfigAction::Paths => {
            if let Ok(env) = std::env::var(vca_core::config::CONFIG_ENV) {
                println!("{} (from {})", env, vca_core::config::CONFIG_ENV);
            }
            for path in VcaConfig::config_search_paths() {
                let marker = if path.exists() { "*" } else { " " };
                println!("{} {}", marker, path.display());
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // A config file only sets the log format; -v always sets the level
    let file_config = load_config(cli.config.as_deref());
    let mut log_config = file_config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    log_config.level = LogLevel::from_verbosity(cli.verbose);
    init_logging(&log_config);

    match cli.command {
        Commands::Synth {
            output,
            channels,
            size,
            index,
            seed,
            ellipticity,
            theta,
            noise,
            pixel_scale,
            beam,
        } => cmd_synth(
            output,
            channels,
            size,
            index,
            seed,
            ellipticity,
            theta,
            noise,
            pixel_scale,
            beam,
        ),

        Commands::Run {
            input,
            low_cut,
            high_cut,
            channel_width,
            apodize,
            alpha,
            beta,
            beam_correct,
            weighted,
            no_2d,
            output,
            keep_data,
            profile,
        } => cmd_run(
            file_config?,
            input,
            low_cut,
            high_cut,
            channel_width,
            apodize,
            alpha,
            beta,
            beam_correct,
            weighted,
            no_2d,
            output,
            keep_data,
            profile,
        ),

        Commands::Distance {
            cube1,
            cube2,
            low_cut,
            high_cut,
            width1,
            width2,
            json,
        } => cmd_distance(
            file_config?,
            cube1,
            cube2,
            low_cut,
            high_cut,
            width1,
            width2,
            json,
        ),

        Commands::Config { action } => cmd_config(action, cli.config.as_deref()),
    }
}
