use super::*;

pub(super) fn load_config(args: &Args) -> Result<Config> {
    let file = match &args.config {
        Some(path) => read_config_file(path)?,
        None => ConfigFile::default(),
    };

    let token = non_empty(args.token.clone())
        .or_else(|| non_empty(file.token.clone()))
        .ok_or_else(|| {
            anyhow!("empty token: pass --tg-bot-token, set READLATER_BOT_TOKEN or add token to the config")
        })?;

    let db_path = args
        .db_path
        .clone()
        .or(file.db_path)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

    Ok(Config {
        token,
        db_path,
        api_url: non_empty(file.api_url),
        batch_size: file
            .batch_size
            .unwrap_or(DEFAULT_BATCH_SIZE)
            .clamp(1, MAX_BATCH_SIZE),
        poll_timeout_seconds: file
            .poll_timeout_seconds
            .unwrap_or(DEFAULT_POLL_TIMEOUT_SECS),
        idle_delay: Duration::from_millis(file.idle_delay_ms.unwrap_or(DEFAULT_IDLE_DELAY_MS)),
        retry_delay: Duration::from_millis(file.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)),
        title_timeout: Duration::from_secs(
            file.title_timeout_seconds
                .unwrap_or(DEFAULT_TITLE_TIMEOUT_SECS),
        ),
    })
}

pub(super) fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&contents).context("parse config")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// True for absolute URLs with a host, e.g. `https://example.com/a`.
pub(super) fn is_url(text: &str) -> bool {
    match url::Url::parse(text) {
        Ok(url) => url.host_str().map(|host| !host.is_empty()).unwrap_or(false),
        Err(_) => false,
    }
}

/// A random-pick reply. Falls back to a plain, cut URL if it would not fit one message.
pub(super) fn format_page(page: &Page) -> (String, bool) {
    let markdown = !page.title.is_empty();
    let text = render_page(page, markdown);
    if message_len(&text) <= MAX_MESSAGE_LEN {
        (text, markdown)
    } else {
        (truncate_message(&page.url), false)
    }
}

/// Numbered lines separated by a blank line. Markdown is on if any page has a title.
/// Also returns how many leading pages fit into one message; the rest stay saved.
pub(super) fn format_page_list(pages: &[Page]) -> (String, bool, usize) {
    for count in (1..=pages.len()).rev() {
        let (text, markdown) = render_page_list(&pages[..count]);
        if message_len(&text) <= MAX_MESSAGE_LEN {
            return (text, markdown, count);
        }
    }
    match pages.first() {
        Some(page) => (truncate_message(&format!("1. {}", page.url)), false, 1),
        None => (String::new(), false, 0),
    }
}

fn render_page_list(pages: &[Page]) -> (String, bool) {
    let markdown = pages.iter().any(|page| !page.title.is_empty());
    let lines: Vec<String> = pages
        .iter()
        .enumerate()
        .map(|(idx, page)| format!("{}. {}", idx + 1, render_page(page, markdown)))
        .collect();
    (lines.join("\n\n"), markdown)
}

fn render_page(page: &Page, markdown: bool) -> String {
    if !page.title.is_empty() {
        format!("[{}]({})", link_text(&page.title), link_target(&page.url))
    } else if markdown {
        escape_markdown(&page.url)
    } else {
        page.url.clone()
    }
}

pub(super) fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// A `)` would end the link early.
fn link_target(url: &str) -> String {
    url.replace(')', "%29")
}

// Telegram counts message length in UTF-16 code units.
pub(super) fn message_len(text: &str) -> usize {
    text.encode_utf16().count()
}

pub(super) fn truncate_message(text: &str) -> String {
    if message_len(text) <= MAX_MESSAGE_LEN {
        return text.to_string();
    }
    let mut out = String::new();
    let mut len = 0;
    for c in text.chars() {
        if len + c.len_utf16() > MAX_MESSAGE_LEN - 1 {
            break;
        }
        len += c.len_utf16();
        out.push(c);
    }
    out.push('…');
    out
}

// Legacy Markdown has no escaping inside link text.
fn link_text(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '[' => '(',
            ']' => ')',
            '*' | '_' | '`' => ' ',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(super) fn today_date() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
