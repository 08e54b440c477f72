//! # srcalc-core
//!
//! Risk-model evaluation engine and VistA patient-data adapter.
//!
//! The crate is split along the two pieces with real logic in them:
//!
//! - **Scoring**: [`variable`], [`value`], [`model`] and [`calculation`]
//!   turn a set of typed clinical values into per-model risk percentages.
//! - **Retrieval**: [`vista`] pulls demographics, vitals, labs, health
//!   factors, medications and notes through a [`vista::ProcedureCaller`]
//!   and parses the positional text responses into a [`patient::Patient`].
//!
//! [`catalog`] and [`storage`] hold the configurable set of variables,
//! models and specialties.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐ RPC lines ┌───────────────┐  Patient  ┌──────────────┐
//! │ ProcedureCaller │ ────────► │ RpcPatientDao │ ────────► │ Calculation  │
//! └─────────────────┘           └───────────────┘           │  + Catalog   │
//!                                                           └──────┬───────┘
//!                                                                  │ ValueSet
//!                                                           ┌──────▼───────┐
//!                                                           │  RiskModel   │
//!                                                           │  (logistic)  │
//!                                                           └──────────────┘
//! ```
//!
//! The crate performs no network I/O of its own; transports implement
//! [`vista::ProcedureCaller`].

pub mod calculation;
pub mod catalog;
pub mod model;
pub mod patient;
pub mod storage;
pub mod value;
pub mod variable;
pub mod vista;

pub use calculation::{
    Calculation, CalculationError, CalculationResult, DisplayGroup, MissingValue, PrefilledValue,
    ResultValue, Specialty, specialty_display_groups, specialty_variables,
};
pub use catalog::{Catalog, CatalogError, FieldError, FieldErrorCode, validate_variable};
pub use model::{Condition, ModelOutcome, ModelTerm, RiskModel, Rule, Summand, ValueMatcher};
pub use patient::{Gender, HealthFactor, Patient, ReferenceNote, RetrievedValue, VistaLab};
pub use storage::{CatalogStore, StorageError};
pub use value::{DiscreteValue, InvalidInput, RawInput, Value, ValueError, ValueSet, bind_inputs};
pub use variable::{
    Category, DisplayType, MultiSelectOption, NumericalBounds, RetrievalKey, Variable,
    VariableGroup, VariableKind,
};
pub use vista::{
    DataAccessError, PatientSource, ProcedureCaller, RemoteProcedure, RpcArg, RpcError, RpcFailure,
    RpcPatientDao, SaveNoteCode, ScriptedCaller, ScriptedResponse,
};
