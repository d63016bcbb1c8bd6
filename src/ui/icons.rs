//! Emoji used by the terminal printer, with plain-text fallbacks.

use console::Emoji;

// Log levels
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "[..]");
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!!]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static TOOL: Emoji<'_, '_> = Emoji("🔧 ", "[>]");

// Session status
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static PAUSED: Emoji<'_, '_> = Emoji("⏸️  ", "[||]");
pub static IDLE: Emoji<'_, '_> = Emoji("💤 ", "[-]");

// Queue sections
pub static QUEUE: Emoji<'_, '_> = Emoji("📋 ", "");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static BRANCH: Emoji<'_, '_> = Emoji("🌿 ", "[B]");
