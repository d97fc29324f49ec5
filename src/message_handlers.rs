use super::*;

pub(crate) const RND_CMD: &str = "/rnd";
pub(crate) const HELP_CMD: &str = "/help";
pub(crate) const START_CMD: &str = "/start";
pub(crate) const LAST_FIVE_CMD: &str = "/get";

pub(crate) const MSG_HELP: &str = "I can save and keep your pages. I can also offer you some of them to read.\n\n\
Send me a link and I will save it.\n\n\
/rnd sends you a random page from your list.\n\
/get sends you the last five pages you saved.\n\n\
Pages are removed from the list once I send them to you.";
pub(crate) const MSG_HELLO: &str = "Hi there! 👾\n\nSend /help to see what I can do.";
pub(crate) const MSG_UNKNOWN_COMMAND: &str = "Unknown command 🤔";
pub(crate) const MSG_NO_SAVED_PAGES: &str = "You have no saved pages 🙊";
pub(crate) const MSG_SAVED: &str = "Saved! 👌";
pub(crate) const MSG_ALREADY_EXISTS: &str = "You have already saved this page 🤗";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Store(String),
    Help,
    Greet,
    ListLastFive,
    RandomPick,
    Unknown,
}

pub(crate) fn classify(text: &str) -> Command {
    let text = text.trim();
    if is_url(text) {
        return Command::Store(text.to_string());
    }
    match text {
        RND_CMD => Command::RandomPick,
        HELP_CMD => Command::Help,
        START_CMD => Command::Greet,
        LAST_FIVE_CMD => Command::ListLastFive,
        _ => Command::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaveOutcome {
    Saved,
    AlreadySaved,
}

pub(crate) struct Processor<S, R, T> {
    store: S,
    sink: R,
    titles: T,
}

impl<S, R, T> Processor<S, R, T>
where
    S: PageStore,
    R: ReplySink,
    T: TitleResolver,
{
    pub(crate) fn new(store: S, sink: R, titles: T) -> Self {
        Processor {
            store,
            sink,
            titles,
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn sink(&self) -> &R {
        &self.sink
    }

    async fn do_cmd(&self, text: &str, chat_id: i64, owner: &str) -> Result<()> {
        info!("got new command '{}' from '{}'", text.trim(), owner);

        match classify(text) {
            Command::Store(url) => self.save_page(chat_id, &url, owner).await.map(|_| ()),
            Command::RandomPick => self.send_random(chat_id, owner).await,
            Command::ListLastFive => self.send_last_five(chat_id, owner).await,
            Command::Help => self.sink.send(chat_id, MSG_HELP, false).await,
            Command::Greet => self.sink.send(chat_id, MSG_HELLO, false).await,
            Command::Unknown => self.sink.send(chat_id, MSG_UNKNOWN_COMMAND, false).await,
        }
    }

    pub(crate) async fn save_page(&self, chat_id: i64, url: &str, owner: &str) -> Result<SaveOutcome> {
        if self
            .store
            .exists(url, owner)
            .await
            .context("can't save page")?
        {
            self.sink.send(chat_id, MSG_ALREADY_EXISTS, false).await?;
            return Ok(SaveOutcome::AlreadySaved);
        }

        let page = Page::new(url, owner).with_title(self.resolve_title(url).await);
        self.store.save(&page).await.context("can't save page")?;
        debug!("saved page {} for '{}'", page.hash(), owner);

        self.sink.send(chat_id, MSG_SAVED, false).await?;
        Ok(SaveOutcome::Saved)
    }

    /// Empty title when the page can't be fetched or has no title element.
    pub(crate) async fn resolve_title(&self, url: &str) -> String {
        match self.titles.resolve(url).await {
            Ok(title) => title,
            Err(err) => {
                warn!("can't resolve title of {}: {:#}", url, err);
                String::new()
            }
        }
    }

    async fn send_random(&self, chat_id: i64, owner: &str) -> Result<()> {
        let Some(taken) = take(&self.store, owner, Selector::Random)
            .await
            .context("can't send random page")?
        else {
            return self.sink.send(chat_id, MSG_NO_SAVED_PAGES, false).await;
        };

        let Some(page) = taken.pages().first() else {
            return self.sink.send(chat_id, MSG_NO_SAVED_PAGES, false).await;
        };
        let (text, markdown) = format_page(page);
        self.deliver(chat_id, &text, markdown, taken)
            .await
            .context("can't send random page")
    }

    async fn send_last_five(&self, chat_id: i64, owner: &str) -> Result<()> {
        let Some(mut taken) = take(&self.store, owner, Selector::LastFive)
            .await
            .context("can't send last pages")?
        else {
            return self.sink.send(chat_id, MSG_NO_SAVED_PAGES, false).await;
        };

        let (text, markdown, fitted) = format_page_list(taken.pages());
        if fitted < taken.pages().len() {
            debug!(
                "only {} of {} pages fit into one message",
                fitted,
                taken.pages().len()
            );
            taken.truncate(fitted);
        }
        self.deliver(chat_id, &text, markdown, taken)
            .await
            .context("can't send last pages")
    }

    // Pages are removed only after the reply went out.
    async fn deliver(&self, chat_id: i64, text: &str, markdown: bool, taken: Take<'_, S>) -> Result<()> {
        if let Err(err) = self.sink.send(chat_id, text, markdown).await {
            let kept = taken.release();
            warn!("reply failed, keeping {} page(s)", kept.len());
            return Err(err);
        }
        for page in taken.pages() {
            debug!("delivered page {}", page.hash());
        }
        taken.commit().await
    }
}

#[async_trait]
impl<S, R, T> EventHandler for Processor<S, R, T>
where
    S: PageStore,
    R: ReplySink,
    T: TitleResolver,
{
    async fn handle(&self, event: &Event) -> Result<()> {
        match event.kind {
            EventKind::Message => self
                .do_cmd(&event.text, event.chat_id, &event.owner)
                .await
                .with_context(|| format!("can't process message {}", event.id)),
            EventKind::Unknown => Err(anyhow!("can't process event {}: unknown event type", event.id)),
        }
    }
}
