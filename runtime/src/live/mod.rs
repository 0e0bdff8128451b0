//! Live reader work: the foreground lock, per-chapter state machine,
//! chapter selection and the book orchestrator.

pub mod book;
pub mod chapter;
pub mod lock;
pub mod selection;
