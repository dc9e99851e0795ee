// src/overlay/interaction.rs
//! Hover state for an interactive overlay client. The settled `hovered()` index
//! is what a client sends as the `hovered` query parameter of the overlay route,
//! next to the `active` selection.

use std::time::{Duration, Instant};

/// Window during which rapid enter/leave events collapse into one change.
pub const HOVER_DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
struct PendingHover {
    target: Option<usize>,
    due: Instant,
}

/// Debounced hover state for overlay markers. Hover is tracked independently
/// of the externally selected (active) issue.
#[derive(Debug, Clone)]
pub struct HoverTracker {
    hovered: Option<usize>,
    pending: Option<PendingHover>,
    debounce: Duration,
}

impl Default for HoverTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HoverTracker {
    pub fn new() -> Self {
        Self::with_debounce(HOVER_DEBOUNCE)
    }

    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            hovered: None,
            pending: None,
            debounce,
        }
    }

    pub fn hovered(&self) -> Option<usize> {
        self.hovered
    }

    pub fn pointer_enter(&mut self, index: usize, now: Instant) {
        self.schedule(Some(index), now);
    }

    pub fn pointer_leave(&mut self, index: usize, now: Instant) {
        // The pointer may already have entered a neighbouring marker.
        let heading_elsewhere = matches!(
            self.pending,
            Some(PendingHover { target: Some(t), .. }) if t != index
        );
        if heading_elsewhere {
            return;
        }
        self.schedule(None, now);
    }

    /// Commits the pending change once its window has passed. Returns whether
    /// the hovered marker changed.
    pub fn settle(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(pending) if now >= pending.due => {
                self.pending = None;
                let changed = self.hovered != pending.target;
                self.hovered = pending.target;
                changed
            }
            _ => false,
        }
    }

    fn schedule(&mut self, target: Option<usize>, now: Instant) {
        if target == self.hovered {
            self.pending = None;
            return;
        }
        self.pending = Some(PendingHover {
            target,
            due: now + self.debounce,
        });
    }
}
