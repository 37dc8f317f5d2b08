//! Pipeline stages for report generation.
//!
//! Each submodule implements one step, so each can be tested on its own and
//! swapped (a different backend, a different document format) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ generate ──▶ validate ──▶ render
//! (JSON)    (facts)     (LLM/tiers)  (checks)     (PPTX)
//! ```
//!
//! 1. [`extract`] : resolve extracted-mode slots by dotted path; never fails
//! 2. [`generate`]: resolve AI slots; plans [`batch`]es, calls the [`llm`]
//!    backend with retry, [`parse`]s replies, and drops to the
//!    [`fallback`] tiers for anything left unresolved
//! 3. [`validate`]: completeness (fatal) and numeric fact-check (warnings)
//! 4. [`render`]  : fill a [`pptx`] package; charts and tables come from
//!    [`drawing`]

pub mod batch;
pub mod drawing;
pub mod extract;
pub mod fallback;
pub mod generate;
pub mod llm;
pub mod parse;
pub mod pptx;
pub mod render;
pub mod validate;
