//! Shared data types for the devconsole backend.

pub mod actions;
pub mod log_entry;
pub mod network;
pub mod pending;
pub mod performance;
pub mod schema;

pub use actions::{ActionType, EnhancedAction, REDACTED_PLACEHOLDER};
pub use log_entry::{LogEntry, MAX_LOG_ENTRY_BYTES, VALID_LEVELS};
pub use network::{
    ConnState, ConnectionState, DirectionStats, NetworkBody, WebSocketEvent, WsDirection,
    WsEventKind,
};
pub use pending::{PendingQuery, PendingQuerySnapshot};
pub use performance::{NetworkSummary, PerformanceBaseline, PerformanceSnapshot, TimingPercentiles};
pub use schema::{
    AuthPattern, CoverageSummary, FieldFormat, FieldStat, FieldStatSummary, QueryParamStat,
    QueryParamSummary, SchemaEndpoint, SchemaEndpointSummary, Shape, ShapeSummary, TimingStats,
};
