// STS Reconciliation - Core Library
// Exposes all modules for use in the CLI and tests

pub mod error;
pub mod isin;           // Identifier validation (ISO 6166 check digit)
pub mod normalize;      // Name normalization (legal-suffix cut)
pub mod combo;          // Multi-valued cells
pub mod corrections;    // Correction + override tables
pub mod audit;          // Audit trail
pub mod record;
pub mod register;       // Primary register cleanup
pub mod view;           // Date-range view
pub mod vehicle;        // Vehicle (FVC) register
pub mod matcher;        // Cross-reference matching
pub mod http;           // Retry + cancellation
pub mod firds;          // Streaming reference-data search
pub mod gleif;          // LEI registry client
pub mod enrich;         // Issuer enrichment
pub mod companies_house; // UK residence inference
pub mod flatten;        // Denormalizer
pub mod config;
pub mod pipeline;
pub mod db;
pub mod export;

// Re-export commonly used types
pub use audit::{AuditEvent, AuditKind, AuditLog};
pub use combo::{Cell, Combo};
pub use config::Settings;
pub use corrections::{Corrections, IsinOverride, IssuerOverride};
pub use error::{ComboError, DocumentError, FetchError, MatchError};
pub use flatten::{count_by, flatten};
pub use isin::{classify, validate, IsinStatus};
pub use normalize::{normalize_name, NameNormalizer};
pub use pipeline::{Reconciler, RunOutput, RunSummary};
pub use record::{Column, IssuerFields, Placement, RawRecord, Record, VehicleFields, VehicleMatch};
pub use register::RecordStore;
pub use vehicle::{VehicleEntity, VehicleRegister};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
