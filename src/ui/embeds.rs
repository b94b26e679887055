use serenity::{
    all::{Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use super::reply::{Reply, Tone};
use crate::audio::{LoopMode, QueueItem, SessionSnapshot, SessionState};

/// Standard colour palette.
pub mod colors {
    use serenity::all::Colour;

    pub const PRIMARY_LAVENDER: Colour = Colour::new(0xB19CD9);
    pub const SUCCESS_GREEN: Colour = Colour::new(0x98FB98);
    pub const WARNING_PINK: Colour = Colour::new(0xFFB6C1);
    pub const ERROR_CORAL: Colour = Colour::new(0xFFCCCB);
    pub const INFO_BLUE: Colour = Colour::new(0x87CEEB);
    pub const MUSIC_PLUM: Colour = Colour::new(0xDDA0DD);
}

/// Footer for every embed that doesn't set its own.
pub const STANDARD_FOOTER: &str = "🌸 Powered by Nova";

/// Discord's limit on embed field values.
const FIELD_VALUE_LIMIT: usize = 1024;

pub fn tone_colour(tone: Tone) -> Colour {
    match tone {
        Tone::Success => colors::SUCCESS_GREEN,
        Tone::Error => colors::ERROR_CORAL,
        Tone::Warning => colors::WARNING_PINK,
        Tone::Info => colors::INFO_BLUE,
        Tone::Music => colors::MUSIC_PLUM,
        Tone::Primary => colors::PRIMARY_LAVENDER,
    }
}

/// Turns a platform-neutral reply into an embed.
pub fn render(reply: &Reply) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .description(&reply.description)
        .color(tone_colour(reply.tone))
        .footer(CreateEmbedFooter::new(
            reply.footer.as_deref().unwrap_or(STANDARD_FOOTER),
        ))
        .timestamp(Timestamp::now());

    if let Some(title) = &reply.title {
        embed = embed.title(title);
    }
    if let Some(url) = &reply.url {
        embed = embed.url(url);
    }
    if let Some(thumbnail) = &reply.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }
    if let Some(image) = &reply.image {
        embed = embed.image(image);
    }
    for (name, value, inline) in &reply.fields {
        embed = embed.field(name, truncate(value, FIELD_VALUE_LIMIT), *inline);
    }

    embed
}

pub fn now_playing_reply(item: &QueueItem) -> Reply {
    track_reply("🎵 Now Playing", item)
}

pub fn track_added_reply(item: &QueueItem, position: usize) -> Reply {
    track_reply("✅ Added to Queue", item)
        .field("📍 Position", format!("#{}", position), true)
}

fn track_reply(title: &str, item: &QueueItem) -> Reply {
    let meta = item.metadata.as_ref();
    let mut reply = Reply::music(title, format!("**{}**", item.title()))
        .field(
            "⏱️ Duration",
            item.duration()
                .map(format_duration)
                .unwrap_or_else(|| "🔴 Live".to_string()),
            true,
        )
        .field("👤 Requested by", format!("<@{}>", item.request.requested_by), true);

    if let Some(meta) = meta {
        if let Some(artist) = &meta.artist {
            reply = reply.field("🎤 Artist", artist.clone(), true);
        }
        reply = reply
            .field("🔗 Source", meta.source.label(), true)
            .url(meta.url.clone())
            .thumbnail(meta.thumbnail.clone());
    }

    reply
}

/// One page of `/queue`.
pub fn queue_reply(snapshot: &SessionSnapshot, page: usize) -> Reply {
    if snapshot.now_playing.is_none() && snapshot.queue.is_empty() {
        return Reply::info(
            "Queue",
            "😴 **The queue is empty**\n\n💡 Use `/play <song>` to add music",
        );
    }

    let mut reply = Reply::music("📋 Queue", String::new());

    if let Some(current) = &snapshot.now_playing {
        let status = match (snapshot.state, snapshot.loop_mode) {
            (SessionState::Paused, _) => "⏸️",
            (_, LoopMode::Track) => "🔂",
            (_, LoopMode::Queue) => "🔁",
            _ => "▶️",
        };
        reply = reply.field(format!("{} Now Playing", status), format!("**{}**", current.title()), false);
    }

    let (page, entries) = snapshot.page(page);
    if !entries.is_empty() {
        let listing = entries
            .iter()
            .map(|(position, item)| {
                let duration = item
                    .duration()
                    .map(|d| format!(" `[{}]`", format_duration(d)))
                    .unwrap_or_default();
                format!("**{}**. {}{}", position, item.title(), duration)
            })
            .collect::<Vec<_>>()
            .join("\n");
        reply = reply.field("Up Next", listing, false);
    }

    let total: Duration = snapshot.queue.iter().filter_map(QueueItem::duration).sum();
    let mut info = format!("**Total:** {} track(s)", snapshot.queue.len());
    if !total.is_zero() {
        info.push_str(&format!(" • **Duration:** {}", format_duration(total)));
    }
    if snapshot.loop_mode != LoopMode::Off {
        info.push_str(&format!(" • **Loop:** {}", snapshot.loop_mode));
    }
    reply = reply.field("Info", info, false);

    if snapshot.total_pages() > 1 {
        reply = reply.footer(format!(
            "🌸 Page {}/{} • Powered by Nova",
            page,
            snapshot.total_pages()
        ));
    }

    reply
}

pub fn volume_reply(volume: f32) -> Reply {
    let percent = (volume * 100.0).round() as u32;
    let icon = match percent {
        0 => "🔈",
        1..=50 => "🔉",
        _ => "🔊",
    };

    Reply::music(
        format!("{} Volume", icon),
        format!("**Volume set to {}%**", percent),
    )
    .field("📊 Level", volume_bar(volume), false)
}

/// 20-segment bar; volume runs from 0.0 to 2.0, so each segment is 10%.
pub fn volume_bar(volume: f32) -> String {
    const SEGMENTS: usize = 20;
    let filled = ((volume.clamp(0.0, 2.0) / 2.0) * SEGMENTS as f32).round() as usize;
    format!(
        "`[{}{}]`",
        "█".repeat(filled),
        "▒".repeat(SEGMENTS - filled)
    )
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Cuts `text` to at most `max` characters, ending in an ellipsis when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
