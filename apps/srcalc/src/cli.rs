//! # CLI Commands
//!
//! Every command is a plain function returning its output, so `main` only
//! prints and tests can call them directly.

use crate::api;
use crate::config::{AppConfig, ConfigError};
use crate::fixture::{FixtureError, load_fixture};
use clap::{Parser, Subcommand};
use srcalc_core::vista::{PatientSource, RpcPatientDao, ScriptedCaller};
use srcalc_core::{
    Calculation, CalculationError, CalculationResult, Catalog, CatalogStore, DataAccessError,
    Gender, InvalidInput, MissingValue, Patient, RawInput, StorageError, ValueSet, bind_inputs,
    specialty_display_groups,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// ARGUMENTS
// =============================================================================

#[derive(Debug, Parser)]
#[command(name = "srcalc", version, about = "Surgical risk calculator")]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the catalog database (overrides the config)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the database and import a catalog
    Init {
        /// Catalog JSON file
        #[arg(long)]
        catalog: PathBuf,
        /// Replace an existing database
        #[arg(long)]
        force: bool,
    },
    /// List specialties
    Specialties,
    /// Show the variables of a specialty, by group
    Variables {
        #[arg(long)]
        specialty: u32,
    },
    /// Load a patient from VistA
    Patient {
        #[arg(long)]
        dfn: u32,
    },
    /// Run a calculation
    Calculate {
        #[arg(long)]
        specialty: u32,
        /// JSON object of variable key to value
        #[arg(long)]
        values: PathBuf,
        /// Pre-fill values from this patient
        #[arg(long)]
        dfn: Option<u32>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the HTTP server
    Serve,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0} already exists (use --force to replace it)")]
    AlreadyExists(PathBuf),

    #[error("{0} does not exist (run `srcalc init` first)")]
    NotInitialized(PathBuf),

    #[error("{0}")]
    Rejected(Rejection),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fixture(#[from] FixtureError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Calculation(#[from] CalculationError),

    #[error(transparent)]
    DataAccess(#[from] DataAccessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Every input problem of a calculation at once.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub invalid: Vec<InvalidInput>,
    /// Missing values, excluding those already reported as invalid.
    pub missing: Vec<MissingValue>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "calculation rejected:")?;
        for input in &self.invalid {
            writeln!(f, "  {}: {}", input.key, input.error)?;
        }
        for missing in &self.missing {
            writeln!(f, "  {}", missing)?;
        }
        Ok(())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Open an existing store.
pub fn open_store(db_path: &Path) -> Result<CatalogStore, CliError> {
    if !db_path.exists() {
        return Err(CliError::NotInitialized(db_path.to_path_buf()));
    }
    Ok(CatalogStore::open(db_path)?)
}

/// Build the patient source described by the config.
pub fn patient_source(config: &AppConfig) -> Result<Arc<dyn PatientSource>, CliError> {
    let caller = match &config.vista.fixture {
        Some(path) => load_fixture(path)?,
        None => {
            tracing::warn!("no VistA fixture configured; patient lookups will fail");
            ScriptedCaller::new(config.vista.division.clone())
        }
    };
    let dao = RpcPatientDao::new(caller, config.vista.duz.clone())
        .with_health_factors(config.vista.health_factors.iter().cloned());
    Ok(Arc::new(dao))
}

/// Bind user input, over pre-filled values when `prefill` is set, then run
/// the calculation. Invalid and missing values are reported together.
pub fn calculate(
    calculation: &Calculation,
    inputs: &BTreeMap<String, RawInput>,
    prefill: bool,
) -> Result<CalculationResult, CliError> {
    let (entered, invalid) = bind_inputs(calculation.variables(), inputs);

    let mut values: ValueSet = if prefill {
        calculation
            .prefill()
            .into_iter()
            .filter(|(key, _)| !invalid.iter().any(|i| &i.key == key))
            .map(|(key, prefilled)| (key, prefilled.value))
            .collect()
    } else {
        ValueSet::new()
    };
    for (key, value) in entered.iter() {
        values.insert(key, value.clone());
    }

    match calculation.run(&values) {
        Ok(result) if invalid.is_empty() => Ok(result),
        Ok(_) => Err(CliError::Rejected(Rejection {
            invalid,
            missing: Vec::new(),
        })),
        Err(CalculationError::MissingValues(missing)) => Err(CliError::Rejected(Rejection {
            missing: missing
                .into_iter()
                .filter(|m| !invalid.iter().any(|i| i.key == m.key))
                .collect(),
            invalid,
        })),
        Err(other) => Err(other.into()),
    }
}

fn format_result(result: &CalculationResult) -> String {
    let mut out = format!("Specialty: {}\n\n", result.specialty);
    out.push_str("Inputs:\n");
    for value in &result.values {
        out.push_str(&format!("  {:<30} {}\n", value.display_name, value.display));
    }
    out.push_str("\nRisk:\n");
    for (model, percent) in &result.outcomes {
        out.push_str(&format!("  {:<30} {:.1}%\n", model, percent));
    }
    out
}

// =============================================================================
// COMMANDS
// =============================================================================

/// `srcalc init`
pub fn cmd_init(db_path: &Path, catalog_path: &Path, force: bool) -> Result<String, CliError> {
    if db_path.exists() {
        if !force {
            return Err(CliError::AlreadyExists(db_path.to_path_buf()));
        }
        std::fs::remove_file(db_path)?;
    }

    let catalog: Catalog = serde_json::from_str(&std::fs::read_to_string(catalog_path)?)?;
    let store = CatalogStore::create(db_path)?;
    if let Err(e) = store.import_catalog(&catalog) {
        drop(store);
        std::fs::remove_file(db_path)?;
        return Err(e.into());
    }

    Ok(format!(
        "Initialized {} with {} specialties, {} models, {} variables",
        db_path.display(),
        catalog.specialties.len(),
        catalog.models.len(),
        catalog.variables.len()
    ))
}

/// `srcalc specialties`
pub fn cmd_specialties(db_path: &Path) -> Result<String, CliError> {
    let store = open_store(db_path)?;
    let mut out = String::new();
    for specialty in store.specialties()? {
        out.push_str(&format!(
            "{:>4}  {:<30} models: {:?}\n",
            specialty.id, specialty.name, specialty.model_ids
        ));
    }
    Ok(out)
}

/// `srcalc variables`
pub fn cmd_variables(db_path: &Path, specialty_id: u32) -> Result<String, CliError> {
    let catalog = open_store(db_path)?.load_catalog()?;
    let mut out = String::new();
    for group in specialty_display_groups(&catalog, specialty_id)? {
        out.push_str(&format!("{}\n", group.group.name));
        for variable in &group.variables {
            let detail = match (variable.units(), variable.option_names()) {
                (Some(units), _) if !units.is_empty() => format!(" ({})", units),
                (_, options) if !options.is_empty() => format!(" [{}]", options.join(" | ")),
                _ => String::new(),
            };
            out.push_str(&format!(
                "  {:<20} {}{} - {}\n",
                variable.key,
                variable.display_name,
                detail,
                variable.kind_name()
            ));
        }
    }
    Ok(out)
}

/// `srcalc patient`
pub fn cmd_patient(config: &AppConfig, dfn: u32) -> Result<String, CliError> {
    let patient = patient_source(config)?.get_patient(dfn)?;
    Ok(serde_json::to_string_pretty(&patient)?)
}

/// `srcalc calculate`
pub fn cmd_calculate(
    config: &AppConfig,
    db_path: &Path,
    specialty_id: u32,
    values_path: &Path,
    dfn: Option<u32>,
    json: bool,
) -> Result<String, CliError> {
    let catalog = open_store(db_path)?.load_catalog()?;
    let inputs: BTreeMap<String, RawInput> =
        serde_json::from_str(&std::fs::read_to_string(values_path)?)?;

    let patient = match dfn {
        Some(dfn) => patient_source(config)?.get_patient(dfn)?,
        None => Patient::new(0, "", Gender::Unknown, 0),
    };
    let calculation = Calculation::start(&catalog, specialty_id, patient)?;
    let result = calculate(&calculation, &inputs, dfn.is_some())?;

    if json {
        Ok(serde_json::to_string_pretty(&result)?)
    } else {
        Ok(format_result(&result))
    }
}

/// `srcalc serve`
pub async fn cmd_serve(config: AppConfig, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let patients = patient_source(&config)?;
    let state = api::AppState::new(store, patients, &config.server);
    let router = api::create_router(state);

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(%address, "srcalc listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("srcalc stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
