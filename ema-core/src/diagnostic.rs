//! Diagnostic flash sequence: FLASH_START, alternating ON/OFF, exactly one FLASH_END per run.

use crate::protocol::Command;

/// Phase of the signal. ON is shown as a white screen, OFF as black.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    On,
    Off,
}

impl Phase {
    pub fn command(self) -> Command {
        match self {
            Phase::On => Command::FlashOn,
            Phase::Off => Command::FlashOff,
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Phase::On => "WHITE",
            Phase::Off => "BLACK",
        }
    }

    /// Event value forwarded to the device integration (1 white, 2 black).
    pub fn marker(self) -> u8 {
        match self {
            Phase::On => 1,
            Phase::Off => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Ended,
}

/// State of one diagnostic run. The host sends whatever each call returns.
#[derive(Debug, Clone)]
pub struct FlashSequence {
    run: RunState,
    phase: Phase,
}

impl Default for FlashSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashSequence {
    pub fn new() -> Self {
        Self {
            run: RunState::Idle,
            phase: Phase::Off,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run == RunState::Running
    }

    /// Begin a run. None if one is already running.
    pub fn start(&mut self) -> Option<Command> {
        if self.is_running() {
            return None;
        }
        self.run = RunState::Running;
        self.phase = Phase::Off;
        Some(Command::FlashStart)
    }

    /// Flip the phase. None once the run is no longer running.
    pub fn toggle(&mut self) -> Option<Phase> {
        if !self.is_running() {
            return None;
        }
        self.phase = match self.phase {
            Phase::On => Phase::Off,
            Phase::Off => Phase::On,
        };
        Some(self.phase)
    }

    /// End the run. Yields FLASH_END the first time only.
    pub fn finish(&mut self) -> Option<Command> {
        match self.run {
            RunState::Running => {
                self.run = RunState::Ended;
                Some(Command::FlashEnd)
            }
            RunState::Idle | RunState::Ended => None,
        }
    }
}
