//! 编辑链路：计划（行级操作）、规划、事务式应用、撤销栈

pub mod applier;
pub mod plan;
pub mod planner;
pub mod undo;

pub use applier::{ApplyReport, EditApplier};
pub use plan::{annotate, EditOp, EditPlan};
pub use planner::EditPlanner;
pub use undo::{EditRecord, UndoStack};
