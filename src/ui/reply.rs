use crate::error::BotError;

/// Visual category of a reply, mapped onto the embed colour palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Error,
    Warning,
    Info,
    Music,
    Primary,
}

/// Platform-neutral response produced by a handler or by the gate/router.
///
/// The gateway adapter renders it as an embed, or as plain message content
/// when `plain` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub tone: Tone,
    pub title: Option<String>,
    pub description: String,
    pub fields: Vec<(String, String, bool)>,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    pub image: Option<String>,
    pub footer: Option<String>,
    pub ephemeral: bool,
    pub plain: bool,
}

impl Reply {
    fn new(tone: Tone, title: Option<String>, description: impl Into<String>) -> Self {
        Self {
            tone,
            title,
            description: description.into(),
            fields: Vec::new(),
            url: None,
            thumbnail: None,
            image: None,
            footer: None,
            ephemeral: false,
            plain: false,
        }
    }

    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Tone::Success, Some(format!("✅ {}", title.into())), description)
    }

    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Tone::Info, Some(format!("ℹ️ {}", title.into())), description)
    }

    pub fn music(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Tone::Music, Some(title.into()), description)
    }

    /// Lavender embed for general bot info (`/help`, `/ask`).
    pub fn primary(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Tone::Primary, Some(title.into()), description)
    }

    pub fn warning(description: impl Into<String>) -> Self {
        Self::new(Tone::Warning, None, format!("⚠️ {}", description.into()))
    }

    /// Raw message content, no embed.
    pub fn text(content: impl Into<String>) -> Self {
        let mut reply = Self::new(Tone::Info, None, content);
        reply.plain = true;
        reply
    }

    pub fn from_error(error: &BotError) -> Self {
        let mut reply = Self::new(Tone::Error, None, format!("❌ {}", error));
        reply.ephemeral = error.is_ephemeral();
        reply
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push((name.into(), value.into(), inline));
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn is_error(&self) -> bool {
        self.tone == Tone::Error
    }
}

impl From<BotError> for Reply {
    fn from(error: BotError) -> Self {
        Self::from_error(&error)
    }
}
