use std::thread::{self, JoinHandle};
use std::time::Duration;

use axislink_core::CancelToken;
use crossbeam_channel::Sender;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use tracing::debug;

/// What a key press asks the run loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    ToggleScan,
    Reconnect,
}

/// Spawn a thread that turns key presses into [`KeyAction`]s.
///
/// Quit keys (Esc, q, Q, Ctrl+C) also cancel `cancel` directly, so shutdown
/// does not depend on the receiver.
pub fn spawn_keyboard_monitor(cancel: CancelToken, actions: Sender<KeyAction>) -> JoinHandle<()> {
    thread::spawn(move || {
        debug!("Keyboard monitor started");

        while !cancel.is_cancelled() {
            if event::poll(Duration::from_millis(100)).unwrap_or(false)
                && let Ok(Event::Key(key_event)) = event::read()
                && let Some(action) = classify(&key_event)
            {
                debug!("Key {:?} -> {:?}", key_event.code, action);
                if action == KeyAction::Quit {
                    cancel.cancel();
                }
                if actions.send(action).is_err() || action == KeyAction::Quit {
                    break;
                }
            }
        }

        debug!("Keyboard monitor stopped");
    })
}

fn classify(event: &KeyEvent) -> Option<KeyAction> {
    match event.code {
        KeyCode::Esc => Some(KeyAction::Quit),
        KeyCode::Char('q') | KeyCode::Char('Q') => Some(KeyAction::Quit),
        KeyCode::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyAction::Quit)
        }
        KeyCode::Char('s') | KeyCode::Char('S') => Some(KeyAction::ToggleScan),
        KeyCode::Char('r') | KeyCode::Char('R') => Some(KeyAction::Reconnect),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_quit_keys() {
        for event in [
            KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE),
            KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE),
            KeyEvent::new(KeyCode::Char('Q'), KeyModifiers::SHIFT),
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
        ] {
            assert_eq!(classify(&event), Some(KeyAction::Quit));
        }
    }

    #[test]
    fn test_classify_scan_toggle() {
        let event = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::NONE);
        assert_eq!(classify(&event), Some(KeyAction::ToggleScan));
    }

    #[test]
    fn test_classify_reconnect() {
        let event = KeyEvent::new(KeyCode::Char('R'), KeyModifiers::SHIFT);
        assert_eq!(classify(&event), Some(KeyAction::Reconnect));
    }

    #[test]
    fn test_classify_other_keys() {
        let event = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(classify(&event), None);

        let event = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(classify(&event), None);

        let event = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE);
        assert_eq!(classify(&event), None);
    }
}
