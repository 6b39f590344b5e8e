//! Domain Layer - Quote normalization and handshake rules.
//!
//! Pure types and algorithms with no I/O: timestamp reconstruction, quote
//! documents, dataset routing and the publish-permission state machine.

/// Handshake state machine and per-dataset publish gate.
pub mod handshake;

/// Quote documents and the live/file normalizers.
pub mod quote;

/// Source key and field routing.
pub mod subscription;

/// Millisecond timestamp synthesis and UTC offset selection.
pub mod timestamp;
