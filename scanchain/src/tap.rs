//! The IEEE 1149.1 TAP controller state machine.
//!
//! The engine itself never tracks this explicitly (every public operation
//! starts and ends in Run-Test-Idle), but the emulated adapter steps a full
//! model of it for every TCK edge.

/// The sixteen TAP controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectDrScan,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIrScan,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

impl TapState {
    /// The state reached from `self` after one TCK with the given TMS level.
    pub fn step(self, tms: bool) -> TapState {
        type S = TapState;
        if tms {
            match self {
                S::TestLogicReset => S::TestLogicReset,
                S::RunTestIdle => S::SelectDrScan,
                S::SelectDrScan => S::SelectIrScan,
                S::CaptureDr => S::Exit1Dr,
                S::ShiftDr => S::Exit1Dr,
                S::Exit1Dr => S::UpdateDr,
                S::PauseDr => S::Exit2Dr,
                S::Exit2Dr => S::UpdateDr,
                S::UpdateDr => S::SelectDrScan,
                S::SelectIrScan => S::TestLogicReset,
                S::CaptureIr => S::Exit1Ir,
                S::ShiftIr => S::Exit1Ir,
                S::Exit1Ir => S::UpdateIr,
                S::PauseIr => S::Exit2Ir,
                S::Exit2Ir => S::UpdateIr,
                S::UpdateIr => S::SelectDrScan,
            }
        } else {
            match self {
                S::TestLogicReset => S::RunTestIdle,
                S::RunTestIdle => S::RunTestIdle,
                S::SelectDrScan => S::CaptureDr,
                S::CaptureDr => S::ShiftDr,
                S::ShiftDr => S::ShiftDr,
                S::Exit1Dr => S::PauseDr,
                S::PauseDr => S::PauseDr,
                S::Exit2Dr => S::ShiftDr,
                S::UpdateDr => S::RunTestIdle,
                S::SelectIrScan => S::CaptureIr,
                S::CaptureIr => S::ShiftIr,
                S::ShiftIr => S::ShiftIr,
                S::Exit1Ir => S::PauseIr,
                S::PauseIr => S::PauseIr,
                S::Exit2Ir => S::ShiftIr,
                S::UpdateIr => S::RunTestIdle,
            }
        }
    }

    /// Whether the controller is in either shift state.
    pub fn is_shifting(self) -> bool {
        matches!(self, TapState::ShiftDr | TapState::ShiftIr)
    }
}
