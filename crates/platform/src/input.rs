//! Keyboard input tracking.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Tracks held keys and the edges seen since the last [`begin_frame`](InputState::begin_frame).
#[derive(Debug, Default)]
pub struct InputState {
    /// Currently pressed keys
    pressed_keys: HashSet<KeyCode>,
    /// Keys that were just pressed this frame
    just_pressed_keys: HashSet<KeyCode>,
    /// Keys that were just released this frame
    just_released_keys: HashSet<KeyCode>,
}

impl InputState {
    /// Create a new input state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call once per frame, after the edges have been consumed.
    pub fn begin_frame(&mut self) {
        self.just_pressed_keys.clear();
        self.just_released_keys.clear();
    }

    /// Handle a key press event. Key repeats are not new presses.
    pub fn on_key_pressed(&mut self, key: KeyCode) {
        if self.pressed_keys.insert(key) {
            self.just_pressed_keys.insert(key);
        }
    }

    /// Handle a key release event.
    pub fn on_key_released(&mut self, key: KeyCode) {
        if self.pressed_keys.remove(&key) {
            self.just_released_keys.insert(key);
        }
    }

    /// Drops all held keys, e.g. when the window loses focus.
    pub fn clear(&mut self) {
        self.pressed_keys.clear();
        self.just_pressed_keys.clear();
        self.just_released_keys.clear();
    }

    /// Check if a key is currently pressed.
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    /// Check if a key was just pressed this frame.
    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    /// Check if a key was just released this frame.
    pub fn is_key_just_released(&self, key: KeyCode) -> bool {
        self.just_released_keys.contains(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_edges() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::Tab);
        assert!(input.is_key_pressed(KeyCode::Tab));
        assert!(input.is_key_just_pressed(KeyCode::Tab));

        input.begin_frame();
        assert!(input.is_key_pressed(KeyCode::Tab));
        assert!(!input.is_key_just_pressed(KeyCode::Tab));

        // Repeat while held
        input.on_key_pressed(KeyCode::Tab);
        assert!(!input.is_key_just_pressed(KeyCode::Tab));
    }

    #[test]
    fn test_release_edges() {
        let mut input = InputState::new();
        input.on_key_released(KeyCode::KeyR);
        assert!(!input.is_key_just_released(KeyCode::KeyR));

        input.on_key_pressed(KeyCode::KeyR);
        input.on_key_released(KeyCode::KeyR);
        assert!(!input.is_key_pressed(KeyCode::KeyR));
        assert!(input.is_key_just_released(KeyCode::KeyR));
    }

    #[test]
    fn test_clear() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::ArrowLeft);
        input.clear();
        assert!(!input.is_key_pressed(KeyCode::ArrowLeft));
        assert!(!input.is_key_just_pressed(KeyCode::ArrowLeft));
    }
}
