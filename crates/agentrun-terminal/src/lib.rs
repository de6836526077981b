// Process orchestration
//
// Runs interactive shells, interactive coding agents and one-shot batch agent
// runs behind session ids, and reports their output on a single event stream.

mod chunk;
mod config;
mod decoder;
mod events;
mod filter;
mod logger;
mod orchestrator;
mod piped;
mod pty_handler;
mod registry;
mod runner;

// Re-export public API
pub use chunk::ChunkAssembler;
pub use config::{platform_default_shell, OrchestratorConfig};
pub use decoder::{batch_exit_events, decode_batch_response, BatchResponse, DecodeError};
pub use events::EventSink;
pub use filter::{filter_output, strip_control_sequences, strip_shell_integration, FilteredChunk};
pub use logger::SessionLogger;
pub use orchestrator::ProcessOrchestrator;
pub use runner::{shell_quote, wrap_command, ShellInvocation, ShellKind};

pub use agentrun_types::{
    EntryInfo, OrchestratorError, ProcessConfig, ProcessEvent, SpawnedProcess, ToolType,
    TransportMode,
};

// Constants
pub const MAX_CONCURRENT_SESSIONS: usize = 32;
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;
