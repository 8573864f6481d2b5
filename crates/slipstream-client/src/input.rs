use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Keyboard state, updated from platform key events each render frame.
#[derive(Debug, Default)]
pub struct InputState {
    /// Keys currently held down.
    pub keys_down: HashSet<String>,
    /// Keys pressed this frame (cleared each frame).
    pub keys_just_pressed: HashSet<String>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key down. Auto-repeat of a held key is not a new press.
    pub fn on_key_down(&mut self, code: impl Into<String>) {
        let code = code.into();
        if self.keys_down.insert(code.clone()) {
            self.keys_just_pressed.insert(code);
        }
    }

    pub fn on_key_up(&mut self, code: &str) {
        self.keys_down.remove(code);
    }

    /// Window lost focus: release everything.
    pub fn release_all(&mut self) {
        self.keys_down.clear();
        self.keys_just_pressed.clear();
    }

    pub fn is_key_down(&self, code: &str) -> bool {
        self.keys_down.contains(code)
    }

    pub fn is_key_just_pressed(&self, code: &str) -> bool {
        self.keys_just_pressed.contains(code)
    }

    fn any_down(&self, codes: &[String]) -> bool {
        codes.iter().any(|c| self.is_key_down(c))
    }

    fn any_just_pressed(&self, codes: &[String]) -> bool {
        codes.iter().any(|c| self.is_key_just_pressed(c))
    }

    /// Clear per-frame state. Call at the end of each frame.
    pub fn end_frame(&mut self) {
        self.keys_just_pressed.clear();
    }
}

/// Key codes bound to each driving action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub up: Vec<String>,
    pub down: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub boost: Vec<String>,
    pub brake: Vec<String>,
    pub handbrake: Vec<String>,
    pub toggle_cruise: Vec<String>,
    /// `(key code, ability id)` pairs.
    pub abilities: Vec<(String, String)>,
}

fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            up: codes(&["KeyW", "ArrowUp"]),
            down: codes(&["KeyS", "ArrowDown"]),
            left: codes(&["KeyA", "ArrowLeft"]),
            right: codes(&["KeyD", "ArrowRight"]),
            boost: codes(&["ShiftLeft"]),
            brake: codes(&["KeyX"]),
            handbrake: codes(&["Space"]),
            toggle_cruise: codes(&["KeyC"]),
            abilities: vec![
                ("KeyQ".to_string(), "nitro".to_string()),
                ("KeyE".to_string(), "shock_pulse".to_string()),
                ("KeyR".to_string(), "homing_missile".to_string()),
                ("KeyF".to_string(), "oil_bomb".to_string()),
            ],
        }
    }
}

/// Raw key intent for one frame, before the sequencer derives controls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawControls {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub boost: bool,
    pub brake: bool,
    /// Precision override: handbrake held.
    pub handbrake: bool,
    /// Player setting, toggled by key.
    pub cruise_enabled: bool,
    /// Ability ids whose key went down this frame.
    pub ability_presses: Vec<String>,
}

/// Maps keyboard state to [`RawControls`] and owns the cruise setting.
#[derive(Debug, Clone)]
pub struct InputMapper {
    pub bindings: KeyBindings,
    pub cruise_enabled: bool,
}

impl InputMapper {
    pub fn new(bindings: KeyBindings) -> Self {
        Self {
            bindings,
            cruise_enabled: true,
        }
    }

    pub fn sample(&mut self, input: &InputState) -> RawControls {
        let b = &self.bindings;
        if input.any_just_pressed(&b.toggle_cruise) {
            self.cruise_enabled = !self.cruise_enabled;
        }
        RawControls {
            up: input.any_down(&b.up),
            down: input.any_down(&b.down),
            left: input.any_down(&b.left),
            right: input.any_down(&b.right),
            boost: input.any_down(&b.boost),
            brake: input.any_down(&b.brake),
            handbrake: input.any_down(&b.handbrake),
            cruise_enabled: self.cruise_enabled,
            ability_presses: b
                .abilities
                .iter()
                .filter(|(code, _)| input.is_key_just_pressed(code))
                .map(|(_, id)| id.clone())
                .collect(),
        }
    }
}

impl Default for InputMapper {
    fn default() -> Self {
        Self::new(KeyBindings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_down_and_up() {
        let mut input = InputState::new();
        input.on_key_down("KeyA");
        assert!(input.is_key_down("KeyA"));
        assert!(input.is_key_just_pressed("KeyA"));

        input.end_frame();
        assert!(input.is_key_down("KeyA"));
        assert!(!input.is_key_just_pressed("KeyA"));

        input.on_key_up("KeyA");
        assert!(!input.is_key_down("KeyA"));
    }

    #[test]
    fn held_ability_key_fires_once() {
        let mut input = InputState::new();
        let mut mapper = InputMapper::default();
        input.on_key_down("KeyQ");
        assert_eq!(mapper.sample(&input).ability_presses, vec!["nitro"]);
        input.end_frame();
        // Auto-repeat while held.
        input.on_key_down("KeyQ");
        assert!(mapper.sample(&input).ability_presses.is_empty());
    }

    #[test]
    fn cruise_toggle_flips_setting() {
        let mut input = InputState::new();
        let mut mapper = InputMapper::default();
        assert!(mapper.sample(&input).cruise_enabled);
        input.on_key_down("KeyC");
        assert!(!mapper.sample(&input).cruise_enabled);
        input.end_frame();
        assert!(!mapper.sample(&input).cruise_enabled);
    }

    #[test]
    fn alternate_bindings_map_to_same_action() {
        let mut input = InputState::new();
        let mut mapper = InputMapper::default();
        input.on_key_down("ArrowLeft");
        input.on_key_down("KeyW");
        let raw = mapper.sample(&input);
        assert!(raw.left && raw.up && !raw.right && !raw.down);
    }
}
