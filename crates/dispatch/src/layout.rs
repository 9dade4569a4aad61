//! Character to key code mapping of the default (US) keyboard layout.

use switchyard_events::KeyCode;

/// The key code the default layout produces for `ch`, shifted or not.
pub fn default_layout_code(ch: char) -> Option<KeyCode> {
    if let Some(code) = KeyCode::letter(ch).or_else(|| KeyCode::digit(ch)) {
        return Some(code);
    }
    let code = match ch {
        ' ' => KeyCode::SPACE,
        '\n' => KeyCode::ENTER,
        '\t' => KeyCode::TAB,
        ',' | '<' => KeyCode::COMMA,
        '-' | '_' => KeyCode::MINUS,
        '.' | '>' => KeyCode::PERIOD,
        '/' | '?' => KeyCode::SLASH,
        ';' | ':' => KeyCode::SEMICOLON,
        '=' | '+' => KeyCode::EQUALS,
        '[' | '{' => KeyCode::OPEN_BRACKET,
        '\\' | '|' => KeyCode::BACK_SLASH,
        ']' | '}' => KeyCode::CLOSE_BRACKET,
        '`' | '~' => KeyCode::BACK_QUOTE,
        '\'' | '"' => KeyCode::QUOTE,
        ')' => KeyCode::DIGIT_0,
        '!' => KeyCode(KeyCode::DIGIT_0.0 + 1),
        '@' => KeyCode(KeyCode::DIGIT_0.0 + 2),
        '#' => KeyCode(KeyCode::DIGIT_0.0 + 3),
        '$' => KeyCode(KeyCode::DIGIT_0.0 + 4),
        '%' => KeyCode(KeyCode::DIGIT_0.0 + 5),
        '^' => KeyCode(KeyCode::DIGIT_0.0 + 6),
        '&' => KeyCode(KeyCode::DIGIT_0.0 + 7),
        '*' => KeyCode(KeyCode::DIGIT_0.0 + 8),
        '(' => KeyCode(KeyCode::DIGIT_0.0 + 9),
        _ => return None,
    };
    Some(code)
}
