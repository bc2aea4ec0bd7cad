use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ocd_diagnosis::{
    insights::SeverityByGender,
    session::{InsightsView, VisualsView},
    ArtifactStore, DashboardConfig, DashboardSession, FileArtifactStore, ModelState, Page,
    PageView, PatientFeatures, Prediction, PredictionError, Predictor,
};

const DEFAULT_CONFIG: &str = "ocd.toml";

#[derive(Parser, Debug)]
#[command(name = "ocd", version, about = "OCD patient analysis and diagnosis prediction")]
struct Cli {
    /// Configuration file; `ocd.toml` in the working directory is used when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the patient file named in the configuration.
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prints the headline statistics.
    Summary,
    /// Prints demographics and the monthly diagnosis trend.
    Insights {
        #[arg(long)]
        json: bool,
    },
    /// Prints medication and severity breakdowns.
    Visuals {
        #[arg(long)]
        json: bool,
    },
    /// Trains the model and writes the scaler and model artifacts.
    Train {
        /// Overrides the configured seed.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Classifies one patient with previously trained artifacts.
    Predict(PatientArgs),
    /// Interactive session reading commands from stdin.
    Dashboard,
}

#[derive(Args, Debug)]
struct PatientArgs {
    #[arg(long)]
    age: f64,
    /// Symptom duration in months.
    #[arg(long)]
    duration: f64,
    /// Y-BOCS obsessions sub-score.
    #[arg(long)]
    obsessions: f64,
    /// Y-BOCS compulsions sub-score.
    #[arg(long)]
    compulsions: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.dataset)?;
    match cli.command {
        Commands::Summary => {
            let session = DashboardSession::from_config(&config)?;
            print_summary(&session);
            Ok(())
        }
        Commands::Insights { json } => {
            let mut session = DashboardSession::from_config(&config)?;
            if let PageView::Insights(view) = session.navigate(Page::Insights) {
                if json {
                    println!("{}", serde_json::to_string_pretty(&view)?);
                } else {
                    print_insights(&view);
                }
            }
            Ok(())
        }
        Commands::Visuals { json } => {
            let mut session = DashboardSession::from_config(&config)?;
            if let PageView::Visuals(view) = session.navigate(Page::Visuals) {
                if json {
                    println!("{}", serde_json::to_string_pretty(&view)?);
                } else {
                    print_visuals(&view);
                }
            }
            Ok(())
        }
        Commands::Train { seed } => {
            let mut config = config;
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            let mut session = DashboardSession::from_config(&config)?;
            let report = session.ensure_model()?;
            println!("{}", report.summary());
            println!("artifacts written to {}", config.artifact_dir.display());
            Ok(())
        }
        Commands::Predict(args) => {
            let store: Arc<dyn ArtifactStore> =
                Arc::new(FileArtifactStore::new(&config.artifact_dir));
            let features = PatientFeatures::checked(
                args.age,
                args.duration,
                args.obsessions,
                args.compulsions,
            )?;
            match Predictor::new(store).predict(&features) {
                Ok(prediction) => {
                    print_prediction(&prediction);
                    Ok(())
                }
                Err(PredictionError::ModelNotFound) => {
                    anyhow::bail!("model not found: run `ocd train` first")
                }
                Err(err) => Err(err.into()),
            }
        }
        Commands::Dashboard => {
            let mut session = DashboardSession::from_config(&config)?;
            let stdin = io::stdin();
            run_dashboard(&mut session, stdin.lock(), io::stdout().lock())
        }
    }
}

fn load_config(explicit: Option<&Path>, dataset: Option<PathBuf>) -> Result<DashboardConfig> {
    let mut config = match explicit {
        Some(path) => DashboardConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => DashboardConfig::load(DEFAULT_CONFIG)?,
        None => DashboardConfig::default(),
    };
    if let Some(dataset) = dataset {
        config.dataset = dataset;
    }
    Ok(config)
}

fn run_dashboard<R: BufRead, W: Write>(
    session: &mut DashboardSession,
    input: R,
    mut out: W,
) -> Result<()> {
    writeln!(
        out,
        "commands: page <insights|visuals|prediction>, train, retrain, \
         predict <age> <duration> <obsessions> <compulsions>, stats, quit"
    )?;
    for line in input.lines() {
        let line = line.context("reading dashboard input")?;
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        match command {
            "quit" | "exit" => break,
            "stats" => {
                let stats = session.key_statistics();
                writeln!(out, "{}", serde_json::to_string(&stats)?)?;
            }
            "page" => match parts.next().unwrap_or_default().parse::<Page>() {
                Ok(page) => match session.navigate(page) {
                    PageView::Insights(view) => {
                        writeln!(out, "{}", serde_json::to_string(&view)?)?;
                    }
                    PageView::Visuals(view) => {
                        writeln!(out, "{}", serde_json::to_string(&view)?)?;
                    }
                    PageView::Prediction(state) => writeln!(out, "{}", describe_state(&state))?,
                },
                Err(err) => writeln!(out, "{err}")?,
            },
            "train" => match session.ensure_model() {
                Ok(report) => writeln!(out, "{}", report.summary())?,
                Err(err) => writeln!(out, "training unavailable: {err}")?,
            },
            "retrain" => match session.retrain() {
                Ok(report) => writeln!(out, "{}", report.summary())?,
                Err(err) => writeln!(out, "training unavailable: {err}")?,
            },
            "predict" => {
                let values: Vec<f64> = parts.filter_map(|p| p.parse().ok()).collect();
                let &[age, duration, obsessions, compulsions] = &values[..] else {
                    writeln!(out, "usage: predict <age> <duration> <obsessions> <compulsions>")?;
                    continue;
                };
                let result = PatientFeatures::checked(age, duration, obsessions, compulsions)
                    .and_then(|features| session.predict(&features));
                match result {
                    Ok(prediction) => writeln!(
                        out,
                        "{} ({:.0}% of trees)",
                        prediction.diagnosis,
                        prediction.confidence * 100.0
                    )?,
                    Err(PredictionError::ModelNotFound) => {
                        writeln!(out, "model not found: run `train` first")?;
                    }
                    Err(err) => writeln!(out, "{err}")?,
                }
            }
            other => writeln!(out, "unknown command `{other}`")?,
        }
        out.flush()?;
    }
    Ok(())
}

fn describe_state(state: &ModelState) -> String {
    match state {
        ModelState::Untrained => "model not trained yet; run `train`".into(),
        ModelState::Trained(report) => report.summary(),
        ModelState::Failed(reason) => format!("training unavailable: {reason}"),
    }
}

fn print_summary(session: &DashboardSession) {
    let stats = session.key_statistics();
    println!("Total Patients: {}", stats.total_patients);
    println!("Diagnosed with OCD: {}", stats.diagnosed);
    match stats.average_age {
        Some(age) => println!("Average Age: {age}"),
        None => println!("Average Age: n/a"),
    }
    println!(
        "Usable rows for training: {}/{}",
        session.frame().n_rows(),
        session.table().len()
    );
}

fn print_counts<'a>(title: &str, counts: impl IntoIterator<Item = (&'a String, &'a usize)>) {
    println!("{title}");
    for (value, count) in counts {
        println!("  {value:<20} {count}");
    }
}

fn print_insights(view: &InsightsView) {
    print_counts("Gender", &view.genders);
    print_counts("Ethnicity", &view.ethnicities);
    print_counts("Diagnoses by month", &view.months);
}

fn print_visuals(view: &VisualsView) {
    print_counts("Medications", &view.medications);
    println!("Severity by gender");
    for SeverityByGender {
        gender,
        obsessions,
        compulsions,
    } in &view.severity
    {
        for (label, stats) in [("obsessions", obsessions), ("compulsions", compulsions)] {
            if let Some(s) = stats {
                println!(
                    "  {gender:<8} {label:<12} n={} min={} q1={} median={} q3={} max={}",
                    s.count, s.min, s.q1, s.median, s.q3, s.max
                );
            }
        }
    }
}

fn print_prediction(prediction: &Prediction) {
    println!("Prediction: {}", prediction.diagnosis);
    println!(
        "Votes: negative={} positive={} confidence={:.2}",
        prediction.votes.first().copied().unwrap_or_default(),
        prediction.votes.get(1).copied().unwrap_or_default(),
        prediction.confidence
    );
}
