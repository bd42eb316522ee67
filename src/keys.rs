/// Action requested by a key press in the display window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Quit,
    Select,
    None,
}

const ESC: i32 = 27;
const LOWER_Q: i32 = 113;
const LOWER_S: i32 = 115;

impl Key {
    /// Maps a `highgui::wait_key` result. Only the low byte is meaningful;
    /// `-1` (no key) and anything unrecognized map to [`Key::None`].
    pub fn from_code(code: i32) -> Self {
        if code < 0 {
            return Key::None;
        }
        match code & 0xff {
            ESC | LOWER_Q => Key::Quit,
            LOWER_S => Key::Select,
            _ => Key::None,
        }
    }
}
