//! Grounded mapping of activity descriptions to security frameworks.
//!
//! This crate provides:
//! - A reference knowledge base of MITRE ATT&CK techniques and NICE framework elements
//! - A drafter that proposes technique and KSA ids for free-form activity text
//! - A verifier that checks every proposed id against the knowledge base
//! - An orchestrator that retries with corrective feedback until a draft is grounded
//!
//! # Quick Start
//!
//! ```ignore
//! use ttp_core::{Focus, MapperConfig, Orchestrator, Report};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MapperConfig::from_env()?.with_max_attempts(3);
//!     let orchestrator = Orchestrator::from_config(&config).await;
//!
//!     let input = "sent a fake login page to the finance team";
//!     let outcome = orchestrator.run(input, Focus::Both).await;
//!     println!("{}", Report::new(input, &outcome));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod drafter;
pub mod generation;
pub mod kb;
pub mod orchestrator;
pub mod record;
pub mod report;
pub mod simplify;
pub mod testing;
pub mod verifier;

// Primary public API
pub use config::{ConfigError, MapperConfig};
pub use drafter::Drafter;
pub use generation::{GeminiGenerator, GenerationError, GenerationSettings, Generator};
pub use kb::{KbEntry, KbError, KnowledgeBase, Source};
pub use orchestrator::{apply_focus, Orchestrator, RunOutcome, RunStatus};
pub use record::{CandidateRecord, Focus, KsaRef, TechniqueRef, Verdict, VerdictStatus};
pub use report::Report;
pub use simplify::SimplifyError;
pub use testing::ScriptedGenerator;
pub use verifier::Verifier;
