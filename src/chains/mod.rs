//! Settlement rails: the seam between the orchestrator and the outside world.

pub mod simulated;
pub mod traits;

pub use simulated::SimulatedChainRail;
pub use traits::{
    RailError, RailKind, RailReceipt, RailRegistry, RailResult, RailTransfer, SettlementRail,
};
