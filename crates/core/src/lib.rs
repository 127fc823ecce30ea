//! Domain building blocks shared by the task engine, the OCR pipeline and
//! the HTTP surface.
//!
//! Nothing in here knows about queues or workers: this crate owns the
//! object store, the reclamation discipline, the image size policy and the
//! traits behind which the external recognition / rendering / concatenation
//! engines live.

pub mod config;
pub mod error;
pub mod inspection;
pub mod ocr;
pub mod pdf;
pub mod reclamation;
pub mod storage;
pub mod types;
