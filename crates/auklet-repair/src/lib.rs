pub mod audit;
pub mod buffer;
pub mod classify;
pub mod dispatcher;
pub mod ec;
pub mod error;
pub mod manual;
pub mod metrics;
pub mod observer;
pub mod orders;
pub mod repairer;
pub mod stats_chore;

pub use audit::{AuditReporter, NoopAudit, PieceOutcome, PieceOutcomeKind, TracingAudit};
pub use buffer::RepairBuffer;
pub use classify::{classify, ClassifyOptions, PieceCheck, PieceSet, RepairDecision};
pub use dispatcher::RepairDispatcher;
pub use ec::{DownloadResult, EcClient, EcError, LocalEcClient, UploadedPiece};
pub use error::RepairError;
pub use manual::{run_manual_repair, ManualSummary};
pub use metrics::{ObserverMetrics, QueueMetrics, RepairMetrics};
pub use observer::SegmentHealthObserver;
pub use orders::{AddressedOrderLimit, LocalOrderService, OrderAction, OrderBatch, OrderError, OrderLimit, OrderService};
pub use repairer::{RepairOutcome, RepairReason, SegmentRepairer};
pub use stats_chore::QueueStatsChore;
