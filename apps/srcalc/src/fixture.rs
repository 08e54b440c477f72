//! VistA fixture files.
//!
//! A fixture scripts the answers of remote procedures so the calculator can
//! run without a VistA connection:
//!
//! ```json
//! {
//!   "division": "500",
//!   "responses": [
//!     { "procedure": "GetPatient", "args": ["500"], "lines": ["TESTPATIENT^50^M"] },
//!     { "procedure": "GetLabs", "args": ["500", ["ALBUMIN"]], "lines": ["ALBUMIN^3.0^02/02/2015@14:35:12^g/dl"] },
//!     { "procedure": "SaveProgressNote", "lines": ["1^Success"] }
//!   ]
//! }
//! ```
//!
//! Entries without `args` answer every call of the procedure.

use serde::Deserialize;
use srcalc_core::vista::{RemoteProcedure, RpcArg, RpcFailure, ScriptedCaller, ScriptedResponse};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("cannot read fixture: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid fixture: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
    division: String,
    #[serde(default)]
    responses: Vec<FixtureEntry>,
}

#[derive(Debug, Deserialize)]
struct FixtureEntry {
    procedure: RemoteProcedure,
    #[serde(default)]
    args: Option<Vec<RpcArg>>,
    #[serde(default)]
    lines: Vec<String>,
    #[serde(default)]
    fail: Option<RpcFailure>,
}

/// Build a caller from fixture JSON.
pub fn parse_fixture(json: &str) -> Result<ScriptedCaller, FixtureError> {
    let file: FixtureFile = serde_json::from_str(json)?;
    let mut caller = ScriptedCaller::new(file.division);
    for entry in file.responses {
        let response = match entry.fail {
            Some(failure) => ScriptedResponse::Fail(failure),
            None => ScriptedResponse::Lines(entry.lines),
        };
        match entry.args {
            Some(args) => caller.script(entry.procedure, args, response),
            None => caller.script_any(entry.procedure, response),
        }
    }
    Ok(caller)
}

/// Read a fixture file.
pub fn load_fixture(path: impl AsRef<Path>) -> Result<ScriptedCaller, FixtureError> {
    let json = std::fs::read_to_string(path.as_ref())?;
    let caller = parse_fixture(&json)?;
    tracing::info!(path = %path.as_ref().display(), "loaded VistA fixture");
    Ok(caller)
}
