//! Remote procedures and the transport seam.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The VistA remote procedures srcalc calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RemoteProcedure {
    /// Demographics: `NAME^AGE^GENDER`.
    GetPatient,
    /// The CPRS vitals summary, one vital per line.
    GetRecentVitals,
    /// Measurement history for one vital over a date range.
    GetVital,
    /// Most recent result of a lab, by its possible names.
    GetLabs,
    GetHealthFactors,
    GetActiveMedications,
    /// Notes with an exact title, as XML.
    GetAdlStatus,
    /// Notes whose title contains a substring, as XML.
    GetNotesWithSubstring,
    SaveProgressNote,
}

impl RemoteProcedure {
    /// Every procedure, in the order a patient load calls them.
    pub const ALL: [Self; 9] = [
        Self::GetPatient,
        Self::GetRecentVitals,
        Self::GetVital,
        Self::GetLabs,
        Self::GetHealthFactors,
        Self::GetActiveMedications,
        Self::GetAdlStatus,
        Self::GetNotesWithSubstring,
        Self::SaveProgressNote,
    ];

    /// The RPC name registered in VistA.
    #[must_use]
    pub fn vista_name(self) -> &'static str {
        match self {
            Self::GetPatient => "SR ASRC PATIENT",
            Self::GetRecentVitals => "ORQQVI NOTEVIT",
            Self::GetVital => "GMV EXTRACT REC",
            Self::GetLabs => "SR ASRC LAB",
            Self::GetHealthFactors => "SR ASRC HEALTH FACTORS",
            Self::GetActiveMedications => "SR ASRC ACTIVE MEDS",
            Self::GetAdlStatus => "SR ASRC ADL STATUS",
            Self::GetNotesWithSubstring => "SR ASRC NOTES",
            Self::SaveProgressNote => "SR ASRC SAVE NOTE",
        }
    }

    /// Look a procedure up by its VistA name.
    #[must_use]
    pub fn from_vista_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.vista_name() == name)
    }
}

impl fmt::Display for RemoteProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.vista_name())
    }
}

/// An RPC parameter. Serialized as a plain string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcArg {
    Literal(String),
    List(Vec<String>),
}

impl RpcArg {
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    #[must_use]
    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Failures of a single remote procedure call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The user is not allowed to run the procedure.
    #[error("VistA security error: {0}")]
    Security(String),

    #[error("invalid DUZ: {0}")]
    InvalidDuz(String),

    /// The connection to VistA failed.
    #[error("VistA transport error: {0}")]
    Transport(String),
}

/// Performs remote procedure calls against one VistA division.
///
/// Implementations are synchronous; async callers wrap them in
/// `spawn_blocking`.
pub trait ProcedureCaller: Send + Sync {
    /// Call `procedure` as the user `duz`, returning the response lines.
    fn call(
        &self,
        duz: &str,
        procedure: RemoteProcedure,
        args: &[RpcArg],
    ) -> Result<Vec<String>, RpcError>;

    /// Division identifier (with any suffix) of the target VistA.
    fn division(&self) -> &str;
}
