//! An in-memory [`ProcedureCaller`] answering from a script.
//!
//! Used by tests and by the demo fixture. Calls that match nothing in the
//! script return no lines, which VistA also does for unknown patients.

use super::procedure::{ProcedureCaller, RemoteProcedure, RpcArg, RpcError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One scripted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptedResponse {
    Lines(Vec<String>),
    Fail(RpcFailure),
}

/// Serializable form of [`RpcError`] for fixtures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcFailure {
    Security(String),
    InvalidDuz(String),
    Transport(String),
}

impl From<RpcFailure> for RpcError {
    fn from(failure: RpcFailure) -> Self {
        match failure {
            RpcFailure::Security(m) => Self::Security(m),
            RpcFailure::InvalidDuz(m) => Self::InvalidDuz(m),
            RpcFailure::Transport(m) => Self::Transport(m),
        }
    }
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub duz: String,
    pub procedure: RemoteProcedure,
    pub args: Vec<RpcArg>,
}

/// Scripted caller.
///
/// Exact-argument responses take precedence over per-procedure fallbacks.
#[derive(Debug, Default)]
pub struct ScriptedCaller {
    division: String,
    exact: BTreeMap<(RemoteProcedure, Vec<RpcArg>), ScriptedResponse>,
    any: BTreeMap<RemoteProcedure, ScriptedResponse>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedCaller {
    #[must_use]
    pub fn new(division: impl Into<String>) -> Self {
        Self {
            division: division.into(),
            ..Self::default()
        }
    }

    /// Answer `procedure` called with exactly `args`.
    #[must_use]
    pub fn respond<I, S>(mut self, procedure: RemoteProcedure, args: Vec<RpcArg>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines.into_iter().map(Into::into).collect();
        self.exact
            .insert((procedure, args), ScriptedResponse::Lines(lines));
        self
    }

    /// Answer `procedure` regardless of arguments.
    #[must_use]
    pub fn respond_any<I, S>(mut self, procedure: RemoteProcedure, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines.into_iter().map(Into::into).collect();
        self.any.insert(procedure, ScriptedResponse::Lines(lines));
        self
    }

    /// Fail every call of `procedure`.
    #[must_use]
    pub fn fail(mut self, procedure: RemoteProcedure, error: RpcFailure) -> Self {
        self.any.insert(procedure, ScriptedResponse::Fail(error));
        self
    }

    /// Add a scripted response for exact arguments.
    pub fn script(&mut self, procedure: RemoteProcedure, args: Vec<RpcArg>, response: ScriptedResponse) {
        self.exact.insert((procedure, args), response);
    }

    /// Add a scripted fallback for a procedure.
    pub fn script_any(&mut self, procedure: RemoteProcedure, response: ScriptedResponse) {
        self.any.insert(procedure, response);
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl ProcedureCaller for ScriptedCaller {
    fn call(
        &self,
        duz: &str,
        procedure: RemoteProcedure,
        args: &[RpcArg],
    ) -> Result<Vec<String>, RpcError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                duz: duz.to_string(),
                procedure,
                args: args.to_vec(),
            });
        }

        let response = self
            .exact
            .get(&(procedure, args.to_vec()))
            .or_else(|| self.any.get(&procedure));
        match response {
            Some(ScriptedResponse::Lines(lines)) => Ok(lines.clone()),
            Some(ScriptedResponse::Fail(failure)) => Err(failure.clone().into()),
            None => Ok(Vec::new()),
        }
    }

    fn division(&self) -> &str {
        &self.division
    }
}
