//! Shared UI icons.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");

pub static SEED: Emoji<'_, '_> = Emoji("🌱 ", "[S]");
pub static LINK: Emoji<'_, '_> = Emoji("🔗 ", "[D]");
pub static KEY: Emoji<'_, '_> = Emoji("🔑 ", "[K]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
