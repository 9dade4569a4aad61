//! Key codes and modifier masks.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Virtual key code as reported by the toolkit.
///
/// Values follow the classic virtual-key numbering used by desktop toolkits,
/// so codes read from configuration files line up with what the toolkit
/// emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u32);

impl KeyCode {
    pub const UNDEFINED: KeyCode = KeyCode(0x00);
    pub const BACK_SPACE: KeyCode = KeyCode(0x08);
    pub const TAB: KeyCode = KeyCode(0x09);
    pub const ENTER: KeyCode = KeyCode(0x0A);
    pub const SHIFT: KeyCode = KeyCode(0x10);
    pub const CONTROL: KeyCode = KeyCode(0x11);
    pub const ALT: KeyCode = KeyCode(0x12);
    pub const ESCAPE: KeyCode = KeyCode(0x1B);
    pub const SPACE: KeyCode = KeyCode(0x20);
    pub const COMMA: KeyCode = KeyCode(0x2C);
    pub const MINUS: KeyCode = KeyCode(0x2D);
    pub const PERIOD: KeyCode = KeyCode(0x2E);
    pub const SLASH: KeyCode = KeyCode(0x2F);
    pub const DIGIT_0: KeyCode = KeyCode(0x30);
    pub const SEMICOLON: KeyCode = KeyCode(0x3B);
    pub const EQUALS: KeyCode = KeyCode(0x3D);
    pub const A: KeyCode = KeyCode(0x41);
    pub const Z: KeyCode = KeyCode(0x5A);
    pub const OPEN_BRACKET: KeyCode = KeyCode(0x5B);
    pub const BACK_SLASH: KeyCode = KeyCode(0x5C);
    pub const CLOSE_BRACKET: KeyCode = KeyCode(0x5D);
    pub const META: KeyCode = KeyCode(0x9D);
    pub const BACK_QUOTE: KeyCode = KeyCode(0xC0);
    pub const QUOTE: KeyCode = KeyCode(0xDE);
    pub const WINDOWS: KeyCode = KeyCode(0x20C);

    /// Code of the letter key `c` (`'a'..='z'`, either case).
    pub fn letter(c: char) -> Option<KeyCode> {
        let upper = c.to_ascii_uppercase();
        upper
            .is_ascii_uppercase()
            .then(|| KeyCode(Self::A.0 + (upper as u32 - 'A' as u32)))
    }

    /// Code of the digit key `d` (`'0'..='9'`).
    pub fn digit(d: char) -> Option<KeyCode> {
        d.to_digit(10).map(|n| KeyCode(Self::DIGIT_0.0 + n))
    }
}

bitflags! {
    /// Modifier and button-down masks carried by input events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const META = 1 << 2;
        const ALT = 1 << 3;
        const ALT_GRAPH = 1 << 5;
        const BUTTON1 = 1 << 10;
        const BUTTON2 = 1 << 11;
        const BUTTON3 = 1 << 12;
        const BUTTON4 = 1 << 14;
        const BUTTON5 = 1 << 15;
    }
}

impl Modifiers {
    /// Button-down mask for a physical button index, if one exists.
    pub fn button_down(button: u16) -> Modifiers {
        match button {
            1 => Modifiers::BUTTON1,
            2 => Modifiers::BUTTON2,
            3 => Modifiers::BUTTON3,
            4 => Modifiers::BUTTON4,
            5 => Modifiers::BUTTON5,
            _ => Modifiers::empty(),
        }
    }
}
