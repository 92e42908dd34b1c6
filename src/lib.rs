//! Fieldcore - world simulation core of a field-hosting game node
//!
//! Hosts live field instances: object pools, the split grid that decides
//! who sees what, the entry/exit protocol, spawn generators, and the
//! request/reply sessions NPC scripts use to talk to players.

// ============================================
// Host
// ============================================

/// Host configuration
pub mod config;
/// Tick driver, host state and field registry
pub mod core;

// ============================================
// Collaborator seams
// ============================================

/// Packet sinks and outbound packet encoding
pub mod network;
/// Party/guild synchronization
pub mod social;
/// Immutable map data
pub mod template;

// ============================================
// Simulation
// ============================================

/// NPC script dialogue sessions
pub mod conversation;
/// Live field instances
pub mod field;
