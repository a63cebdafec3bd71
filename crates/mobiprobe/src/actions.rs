//! W3C input action sequences (touch pointer and keyboard).

use crate::geometry::Point;
use serde::{Deserialize, Serialize};

/// Reference frame of a pointer move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Absolute viewport coordinates
    Viewport,
    /// Relative to the current pointer position
    Pointer,
}

/// One tick of a pointer source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PointerAction {
    /// Move the pointer
    PointerMove {
        /// Duration in milliseconds
        duration: u64,
        /// Target x
        x: i32,
        /// Target y
        y: i32,
        /// Coordinate frame
        origin: Origin,
    },
    /// Press
    PointerDown {
        /// Button index
        button: u8,
    },
    /// Release
    PointerUp {
        /// Button index
        button: u8,
    },
    /// Idle
    Pause {
        /// Duration in milliseconds
        duration: u64,
    },
}

impl PointerAction {
    fn move_to(point: Point, duration: u64) -> Self {
        Self::PointerMove {
            duration,
            x: point.x,
            y: point.y,
            origin: Origin::Viewport,
        }
    }

    const fn down() -> Self {
        Self::PointerDown { button: 0 }
    }

    const fn up() -> Self {
        Self::PointerUp { button: 0 }
    }

    const fn pause(duration: u64) -> Self {
        Self::Pause { duration }
    }
}

/// One tick of a key source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum KeyAction {
    /// Press a key
    KeyDown {
        /// Key value
        value: String,
    },
    /// Release a key
    KeyUp {
        /// Key value
        value: String,
    },
}

/// Pointer source parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerParameters {
    /// Pointer kind
    #[serde(rename = "pointerType")]
    pub pointer_type: String,
}

/// An input source with its actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionSequence {
    /// Touch pointer
    Pointer {
        /// Source id
        id: String,
        /// Pointer parameters
        parameters: PointerParameters,
        /// Actions
        actions: Vec<PointerAction>,
    },
    /// Keyboard
    Key {
        /// Source id
        id: String,
        /// Actions
        actions: Vec<KeyAction>,
    },
}

impl ActionSequence {
    /// Touch pointer sequence
    #[must_use]
    pub fn touch(actions: Vec<PointerAction>) -> Self {
        Self::Pointer {
            id: "finger1".to_string(),
            parameters: PointerParameters {
                pointer_type: "touch".to_string(),
            },
            actions,
        }
    }

    /// Number of ticks in this sequence
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Pointer { actions, .. } => actions.len(),
            Self::Key { actions, .. } => actions.len(),
        }
    }

    /// True when the sequence has no ticks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single tap
#[must_use]
pub fn tap(point: Point) -> ActionSequence {
    ActionSequence::touch(vec![
        PointerAction::move_to(point, 0),
        PointerAction::down(),
        PointerAction::pause(100),
        PointerAction::up(),
    ])
}

/// Press, move over `duration_ms`, release
#[must_use]
pub fn swipe(from: Point, to: Point, duration_ms: u64) -> ActionSequence {
    ActionSequence::touch(vec![
        PointerAction::move_to(from, 0),
        PointerAction::down(),
        PointerAction::move_to(to, duration_ms),
        PointerAction::up(),
    ])
}

/// Long-press then slow move; XCUITest needs the hold before it starts a drag
#[must_use]
pub fn hold_and_drag(from: Point, to: Point) -> ActionSequence {
    ActionSequence::touch(vec![
        PointerAction::move_to(from, 0),
        PointerAction::down(),
        PointerAction::pause(2_000),
        PointerAction::move_to(to, 300),
        PointerAction::up(),
    ])
}

/// Slow move, settle, then a zero-offset move so the release does not fling
#[must_use]
pub fn settle_and_drag(from: Point, to: Point) -> ActionSequence {
    ActionSequence::touch(vec![
        PointerAction::move_to(from, 0),
        PointerAction::down(),
        PointerAction::move_to(to, 300),
        PointerAction::pause(300),
        PointerAction::PointerMove {
            duration: 300,
            x: 0,
            y: 0,
            origin: Origin::Pointer,
        },
        PointerAction::up(),
    ])
}

/// Key down/up for every character
#[must_use]
pub fn type_text(text: &str) -> ActionSequence {
    let actions = text
        .chars()
        .flat_map(|c| {
            [
                KeyAction::KeyDown {
                    value: c.to_string(),
                },
                KeyAction::KeyUp {
                    value: c.to_string(),
                },
            ]
        })
        .collect();
    ActionSequence::Key {
        id: "keyboard".to_string(),
        actions,
    }
}
