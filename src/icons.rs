//! Display icons for participants
//!
//! Human participants get a random glyph on join; bots and the final
//! node use fixed ones so the layers read at a glance in the UI.

use rand::seq::SliceRandom;

/// Fixed glyph for bot participants (robot)
pub const ROBOT_ICON: &str = "\u{f544}";

/// Fixed glyph for the final node (network)
pub const FINAL_NODE_ICON: &str = "\u{f6ff}";

/// Glyph pool for human participants
const HUMAN_ICONS: &[&str] = &[
    "\u{f007}", // user
    "\u{f0c0}", // users
    "\u{f21b}", // mask
    "\u{f52e}", // frog
    "\u{f578}", // fish
    "\u{f6be}", // cat
    "\u{f6d3}", // dog
    "\u{f6e2}", // hippo
    "\u{f6f0}", // mouse
    "\u{f717}", // spider
    "\u{f1b0}", // paw
    "\u{f520}", // crow
    "\u{f535}", // dove
    "\u{f5a0}", // horse
    "\u{f6c8}", // dragon
];

/// Pick a random human icon
pub fn random_icon() -> String {
    HUMAN_ICONS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(HUMAN_ICONS[0])
        .to_string()
}
