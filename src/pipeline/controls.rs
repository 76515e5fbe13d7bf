use crate::compositor::PlacementPreset;
use std::sync::atomic::{AtomicU32, Ordering};

/// Which background the foreground is composited over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackgroundSelection {
    #[default]
    None,
    Image,
    Stream,
}

/// Everything a tick decides on, read in one load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlState {
    pub effect_on: bool,
    pub background: BackgroundSelection,
    pub preset: PlacementPreset,
}

impl ControlState {
    // bit 0: effect, bits 8..16: background, bits 16..24: preset
    fn pack(self) -> u32 {
        let background = match self.background {
            BackgroundSelection::None => 0,
            BackgroundSelection::Image => 1,
            BackgroundSelection::Stream => 2,
        };
        let preset = match self.preset {
            PlacementPreset::Full => 0,
            PlacementPreset::Intermediate => 1,
            PlacementPreset::Small => 2,
        };
        u32::from(self.effect_on) | (background << 8) | (preset << 16)
    }

    fn unpack(word: u32) -> Self {
        let background = match (word >> 8) & 0xff {
            1 => BackgroundSelection::Image,
            2 => BackgroundSelection::Stream,
            _ => BackgroundSelection::None,
        };
        let preset = match (word >> 16) & 0xff {
            0 => PlacementPreset::Full,
            1 => PlacementPreset::Intermediate,
            _ => PlacementPreset::Small,
        };
        Self {
            effect_on: word & 1 == 1,
            background,
            preset,
        }
    }
}

/// Lock-free control block shared between the caller and the render loop.
///
/// All fields live in one atomic word: a reader can see a value that is one
/// tick stale, never a mix of two writes.
#[derive(Debug)]
pub struct Controls {
    word: AtomicU32,
}

impl Default for Controls {
    fn default() -> Self {
        Self::new(ControlState::default())
    }
}

impl Controls {
    pub fn new(state: ControlState) -> Self {
        Self {
            word: AtomicU32::new(state.pack()),
        }
    }

    pub fn snapshot(&self) -> ControlState {
        ControlState::unpack(self.word.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ControlState) {
        self.word.store(state.pack(), Ordering::Release);
    }

    /// Apply `f` atomically and return the new state.
    pub fn update(&self, f: impl Fn(ControlState) -> ControlState) -> ControlState {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let next = f(ControlState::unpack(current)).pack();
            match self
                .word
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return ControlState::unpack(next),
                Err(actual) => current = actual,
            }
        }
    }
}
