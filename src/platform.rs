//! Platform detection and URL acceptance.

use std::fmt;

use serde::Serialize;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Facebook,
    Instagram,
    Tiktok,
    Twitter,
    Reddit,
    Vimeo,
    Dailymotion,
    Twitch,
    Soundcloud,
    Terabox,
    Likee,
    Kwai,
    Bilibili,
    Pinterest,
    Rutube,
    Ok,
    Whatsapp,
    Default,
}

/// Classification rules, checked in order against the lowercased URL.
/// Order matters: the first rule with a matching substring wins.
const PLATFORM_RULES: &[(Platform, &[&str])] = &[
    (Platform::Youtube, &["youtube.com", "youtu.be"]),
    (Platform::Facebook, &["facebook.com", "fb.watch"]),
    (Platform::Instagram, &["instagram.com"]),
    (Platform::Tiktok, &["tiktok.com", "vm.tiktok.com"]),
    (Platform::Twitter, &["twitter.com", "x.com"]),
    (Platform::Reddit, &["reddit.com", "v.redd.it"]),
    (Platform::Vimeo, &["vimeo.com"]),
    (Platform::Dailymotion, &["dailymotion.com"]),
    (Platform::Twitch, &["twitch.tv"]),
    (Platform::Soundcloud, &["soundcloud.com"]),
    (Platform::Terabox, &["terabox.com"]),
    (Platform::Likee, &["likee.com"]),
    (Platform::Kwai, &["kwai.com"]),
    (Platform::Bilibili, &["bilibili.com"]),
    (Platform::Pinterest, &["pinterest.com", "pin.it"]),
    (Platform::Rutube, &["rutube.ru"]),
    (Platform::Ok, &["ok.ru"]),
    (Platform::Whatsapp, &["whatsapp.com"]),
];

/// Hosts accepted for download. A host is accepted when it contains any of
/// these strings.
pub const SUPPORTED_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "m.youtube.com",
    "youtube-nocookie.com",
    "facebook.com",
    "fb.watch",
    "m.facebook.com",
    "web.facebook.com",
    "instagram.com",
    "tiktok.com",
    "vm.tiktok.com",
    "twitter.com",
    "x.com",
    "reddit.com",
    "v.redd.it",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
    "soundcloud.com",
    "terabox.com",
    "likee.com",
    "kwai.com",
    "bilibili.com",
    "pinterest.com",
    "pin.it",
    "rutube.ru",
    "ok.ru",
    "whatsapp.com",
    "t.me",
    "discord.com",
];

impl Platform {
    pub fn classify(url: &str) -> Self {
        let lower = url.to_lowercase();
        PLATFORM_RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|needle| lower.contains(needle)))
            .map(|(platform, _)| *platform)
            .unwrap_or(Platform::Default)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::Tiktok => "tiktok",
            Self::Twitter => "twitter",
            Self::Reddit => "reddit",
            Self::Vimeo => "vimeo",
            Self::Dailymotion => "dailymotion",
            Self::Twitch => "twitch",
            Self::Soundcloud => "soundcloud",
            Self::Terabox => "terabox",
            Self::Likee => "likee",
            Self::Kwai => "kwai",
            Self::Bilibili => "bilibili",
            Self::Pinterest => "pinterest",
            Self::Rutube => "rutube",
            Self::Ok => "ok",
            Self::Whatsapp => "whatsapp",
            Self::Default => "default",
        }
    }

    /// Title-cased name for display.
    pub fn label(self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Youtube => "🎬",
            Self::Facebook => "👥",
            Self::Instagram => "📸",
            Self::Tiktok => "🎵",
            Self::Twitter => "🐦",
            Self::Reddit => "🔴",
            Self::Vimeo => "📹",
            Self::Dailymotion => "📺",
            Self::Twitch => "🎮",
            Self::Soundcloud => "🎧",
            Self::Terabox => "📦",
            Self::Likee => "💃",
            Self::Kwai => "🌟",
            Self::Bilibili => "📱",
            Self::Pinterest => "📌",
            Self::Rutube => "▶️",
            Self::Ok => "🟠",
            Self::Whatsapp => "💬",
            Self::Default => "🔗",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when `input` is an http(s) URL whose host mentions a supported
/// domain. Deliberately permissive: `evilyoutube.com.example` is accepted.
pub fn is_supported(input: &str) -> bool {
    let parsed = match Url::parse(input.trim()) {
        Ok(url) => url,
        Err(_) => return false,
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let host = match parsed.host_str() {
        Some(host) => host.to_ascii_lowercase(),
        None => return false,
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);

    SUPPORTED_DOMAINS.iter().any(|domain| host.contains(domain))
}
