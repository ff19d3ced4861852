//! Voice-activity debouncing
//!
//! Wraps raw per-frame VAD decisions in a sliding window so that a single
//! silent frame inside an utterance does not end the segment.

use std::collections::VecDeque;

/// Number of recent decisions considered when declaring speech stopped.
pub const WINDOW_CAPACITY: usize = 5;

/// Sliding-window gate over per-frame voice decisions.
#[derive(Debug, Default)]
pub struct VoiceGate {
    window: VecDeque<bool>,
    have_voice: bool,
    stop_latched: bool,
}

impl VoiceGate {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_CAPACITY + 1),
            have_voice: false,
            stop_latched: false,
        }
    }

    /// Record one decision. Returns `true` exactly once per segment, when
    /// the window has gone fully silent after voice was heard.
    pub fn observe(&mut self, has_voice: bool) -> bool {
        self.window.push_back(has_voice);
        if self.window.len() > WINDOW_CAPACITY {
            self.window.pop_front();
        }

        if has_voice {
            self.have_voice = true;
        }

        if self.have_voice
            && !self.stop_latched
            && !has_voice
            && self.window.len() == WINDOW_CAPACITY
            && self.window.iter().all(|voiced| !voiced)
        {
            self.stop_latched = true;
            return true;
        }

        false
    }

    /// Whether any voice has been heard since the last reset.
    pub fn have_voice(&self) -> bool {
        self.have_voice
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Clear window and aggregate state; called at session start and after
    /// each handled speech segment.
    pub fn reset(&mut self) {
        self.window.clear();
        self.have_voice = false;
        self.stop_latched = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(gate: &mut VoiceGate, decisions: &[bool]) -> usize {
        decisions.iter().filter(|&&v| gate.observe(v)).count()
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut gate = VoiceGate::new();
        for i in 0..100 {
            gate.observe(i % 3 == 0);
            assert!(gate.window_len() <= WINDOW_CAPACITY);
        }
    }

    #[test]
    fn test_silence_alone_never_stops() {
        let mut gate = VoiceGate::new();
        assert_eq!(feed(&mut gate, &[false; 50]), 0);
    }

    #[test]
    fn test_stop_fires_once_after_voice() {
        let mut gate = VoiceGate::new();
        let mut decisions = vec![false; 20];
        decisions.extend(vec![true; 10]);
        decisions.extend(vec![false; 20]);
        assert_eq!(feed(&mut gate, &decisions), 1);
    }

    #[test]
    fn test_stop_fires_when_window_fully_silent() {
        let mut gate = VoiceGate::new();
        feed(&mut gate, &[true, true]);
        // four silent frames: window still holds a voiced entry
        assert_eq!(feed(&mut gate, &[false; 4]), 0);
        // fifth silent frame empties the window of voice
        assert!(gate.observe(false));
    }

    #[test]
    fn test_brief_silence_does_not_stop() {
        let mut gate = VoiceGate::new();
        // voice, a two-frame dropout, voice again
        assert_eq!(feed(&mut gate, &[true, true, false, false, true, true]), 0);
    }

    #[test]
    fn test_reset_rearms_gate() {
        let mut gate = VoiceGate::new();
        let segment: Vec<bool> = [vec![true; 3], vec![false; 6]].concat();
        assert_eq!(feed(&mut gate, &segment), 1);
        gate.reset();
        assert!(!gate.have_voice());
        assert_eq!(feed(&mut gate, &segment), 1);
    }
}
