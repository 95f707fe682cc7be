pub mod battle;
pub mod history;
pub mod unit;

pub use battle::{
    BattlePhase, BattleState, Direction, FinishedBattle, ReconcilingState, SeedState, UnitCounts,
};
pub use history::{HistorySnapshot, RoomObject, Tick};
pub use unit::{identify_creep, UnitClass};
