//! # VistA Module
//!
//! Patient data retrieval from VistA through remote procedure calls.
//!
//! The transport is abstracted behind [`ProcedureCaller`]; this module only
//! knows which procedures to call, with which arguments, and how to read
//! their answers.
//!
//! ```text
//! PatientSource ─► RpcPatientDao ─► ProcedureCaller ─► (VistA | ScriptedCaller)
//!                        │
//!                        └─► parse / notes (pure)
//! ```
//!
//! A patient load is sequential. Demographics must succeed; vitals, labs,
//! health factors, medications and notes are each best-effort.

mod dao;
pub mod notes;
pub mod parse;
mod procedure;
mod scripted;

pub use dao::{
    ADL_NOTE_TITLE, DNR_NOTE_SUBSTRING, DataAccessError, PatientSource, RpcPatientDao, SaveNoteCode,
};
pub use procedure::{ProcedureCaller, RemoteProcedure, RpcArg, RpcError};
pub use scripted::{RecordedCall, RpcFailure, ScriptedCaller, ScriptedResponse};
