use super::*;
use std::sync::OnceLock;

use regex::Regex;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, UpdateKind};

#[async_trait]
pub(crate) trait ReplySink: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str, markdown: bool) -> Result<()>;
}

#[async_trait]
pub(crate) trait TitleResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<String>;
}

#[derive(Clone)]
pub(crate) struct TelegramClient {
    bot: Bot,
    poll_timeout_seconds: u32,
}

impl TelegramClient {
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let mut bot = Bot::new(config.token.clone());
        if let Some(api_url) = &config.api_url {
            let api_url =
                url::Url::parse(api_url).with_context(|| format!("parse api_url {}", api_url))?;
            bot = bot.set_api_url(api_url);
        }
        Ok(TelegramClient {
            bot,
            poll_timeout_seconds: config.poll_timeout_seconds,
        })
    }

    pub(crate) async fn check_connection(&self) -> Result<()> {
        let me = self.bot.get_me().await.context("get bot info")?;
        info!("authorized as bot {}", me.user.id.0);
        Ok(())
    }
}

#[async_trait]
impl EventSource for TelegramClient {
    async fn fetch(&self, offset: i64, limit: usize) -> Result<Vec<Event>> {
        let offset = i32::try_from(offset).context("offset out of range")?;
        let limit = u8::try_from(limit.clamp(1, MAX_BATCH_SIZE)).context("limit out of range")?;
        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .limit(limit)
            .timeout(self.poll_timeout_seconds)
            .await
            .context("get updates")?;
        Ok(updates.into_iter().map(event_from_update).collect())
    }
}

#[async_trait]
impl ReplySink for TelegramClient {
    #[allow(deprecated)]
    async fn send(&self, chat_id: i64, text: &str, markdown: bool) -> Result<()> {
        let request = self.bot.send_message(ChatId(chat_id), text);
        let request = if markdown {
            request.parse_mode(ParseMode::Markdown)
        } else {
            request
        };
        request.await.context("send message")?;
        Ok(())
    }
}

fn event_from_update(update: Update) -> Event {
    let id = i64::from(update.id);
    match update.kind {
        UpdateKind::Message(msg) => match msg.text() {
            Some(text) => Event::message(id, msg.chat.id.0, &owner_name(&msg), text),
            None => Event::unknown(id),
        },
        _ => Event::unknown(id),
    }
}

fn owner_name(msg: &Message) -> String {
    match msg.from() {
        Some(user) => user
            .username
            .clone()
            .unwrap_or_else(|| user.id.0.to_string()),
        None => msg.chat.id.0.to_string(),
    }
}

pub(crate) struct HttpTitleResolver {
    client: reqwest::Client,
}

impl HttpTitleResolver {
    pub(crate) fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("readlater-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(HttpTitleResolver { client })
    }
}

#[async_trait]
impl TitleResolver for HttpTitleResolver {
    async fn resolve(&self, url: &str) -> Result<String> {
        let parsed = url::Url::parse(url).context("check url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("unsupported scheme {}", parsed.scheme()));
        }
        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .context("get response")?
            .error_for_status()
            .context("response status")?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        if !is_html_content_type(content_type) {
            return Err(anyhow!(
                "not an html page ({})",
                content_type.unwrap_or("no content type")
            ));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.context("read response body")? {
            body.extend_from_slice(&chunk);
            if body.len() >= MAX_TITLE_BODY_BYTES || has_title_end(&body) {
                break;
            }
        }
        body.truncate(MAX_TITLE_BODY_BYTES);

        extract_title(&String::from_utf8_lossy(&body)).ok_or_else(|| anyhow!("no title in {}", url))
    }
}

pub(super) fn is_html_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

pub(super) fn has_title_end(body: &[u8]) -> bool {
    body.windows(b"</title".len())
        .any(|window| window.eq_ignore_ascii_case(b"</title"))
}

fn title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<title(?:\s[^>]*)?>(.*?)</title\s*>").expect("valid title regex")
    })
}

pub(super) fn extract_title(html: &str) -> Option<String> {
    let raw = title_regex().captures(html)?.get(1)?.as_str();
    let title = decode_entities(&raw.split_whitespace().collect::<Vec<_>>().join(" "));
    let title = title.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

fn entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(#[xX][0-9a-fA-F]{1,6}|#[0-9]{1,7}|[a-zA-Z]+);").expect("valid entity regex")
    })
}

pub(super) fn decode_entities(text: &str) -> String {
    entity_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "ndash" => Some('–'),
                    "mdash" => Some('—'),
                    "hellip" => Some('…'),
                    "laquo" => Some('«'),
                    "raquo" => Some('»'),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
