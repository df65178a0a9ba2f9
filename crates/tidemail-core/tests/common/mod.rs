//! In-memory IMAP server shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tidemail_core::{
    Address, Config, Connection, Connector, Envelope, FetchData, FetchItems, Flag, Flags,
    ImapConfig, MailCache, MailboxClient, MailboxInfo, MailboxStatus, RemoteError, RemoteResult,
    SearchIndex, Session, StoreAction, Uid,
};
use tidemail_mime::Message;

/// One stored message.
#[derive(Debug, Clone)]
pub struct MockMessage {
    pub flags: Flags,
    pub raw: Vec<u8>,
}

/// One mailbox.
#[derive(Debug, Clone, Default)]
pub struct MockMailbox {
    pub uid_validity: u32,
    pub next_uid: u32,
    pub messages: BTreeMap<Uid, MockMessage>,
}

#[derive(Debug, Default)]
struct State {
    mailboxes: BTreeMap<String, MockMailbox>,
    commands: Vec<String>,
    connects: usize,
    connect_delay: Option<Duration>,
    fail_fetch_after: Option<usize>,
    fail_store: Option<RemoteError>,
    empty_store_response: bool,
    fetches: usize,
}

/// A scriptable server; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<State>>,
}

pub fn mail(message_id: &str, subject: &str, in_reply_to: Option<&str>, body: &str) -> Vec<u8> {
    let reply = in_reply_to
        .map(|id| format!("In-Reply-To: {id}\r\n"))
        .unwrap_or_default();
    format!(
        "From: Alice <alice@example.com>\r\nTo: bob@example.com\r\n\
         Date: Tue, 5 Mar 2024 09:30:00 +0000\r\nMessage-ID: {message_id}\r\n\
         {reply}Subject: {subject}\r\n\r\n{body}\r\n"
    )
    .into_bytes()
}

fn parse_address(value: &str) -> Address {
    let (name, spec) = match (value.find('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => {
            let name = value[..start].trim().trim_matches('"');
            ((!name.is_empty()).then_some(name), &value[start + 1..end])
        }
        _ => (None, value.trim()),
    };
    let (mailbox, host) = spec.split_once('@').unwrap_or((spec, ""));
    Address::new(name, mailbox, host)
}

fn envelope(raw: &[u8]) -> Envelope {
    let message = Message::parse(raw.to_vec());
    Envelope {
        date: message.date().map(str::to_string),
        subject: message.subject().map(str::to_string),
        from: message.from().map(parse_address).into_iter().collect(),
        to: message.to().map(parse_address).into_iter().collect(),
        cc: Vec::new(),
        in_reply_to: message.headers.get("in-reply-to").map(str::to_string),
        message_id: message.message_id().map(str::to_string),
    }
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mailbox(&self, name: &str, uid_validity: u32) {
        self.state.lock().unwrap().mailboxes.insert(
            name.to_string(),
            MockMailbox {
                uid_validity,
                next_uid: 1,
                messages: BTreeMap::new(),
            },
        );
    }

    pub fn add_message(&self, mailbox: &str, uid: u32, raw: Vec<u8>, flags: &[Flag]) {
        let mut state = self.state.lock().unwrap();
        let mb = state.mailboxes.get_mut(mailbox).unwrap();
        mb.next_uid = mb.next_uid.max(uid + 1);
        mb.messages.insert(
            Uid(uid),
            MockMessage {
                flags: flags.iter().cloned().collect(),
                raw,
            },
        );
    }

    pub fn set_uid_validity(&self, mailbox: &str, uid_validity: u32) {
        self.state
            .lock()
            .unwrap()
            .mailboxes
            .get_mut(mailbox)
            .unwrap()
            .uid_validity = uid_validity;
    }

    pub fn set_flags(&self, mailbox: &str, uid: u32, flags: &[Flag]) {
        let mut state = self.state.lock().unwrap();
        let msg = state
            .mailboxes
            .get_mut(mailbox)
            .unwrap()
            .messages
            .get_mut(&Uid(uid))
            .unwrap();
        msg.flags = flags.iter().cloned().collect();
    }

    pub fn mailbox(&self, name: &str) -> Option<MockMailbox> {
        self.state.lock().unwrap().mailboxes.get(name).cloned()
    }

    pub fn uids(&self, mailbox: &str) -> Vec<Uid> {
        self.mailbox(mailbox)
            .map(|mb| mb.messages.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(command))
            .count()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = Some(delay);
    }

    /// Fails every UID FETCH after `n` successful ones with a transport error.
    pub fn fail_fetch_after(&self, n: usize) {
        self.state.lock().unwrap().fail_fetch_after = Some(n);
    }

    pub fn fail_store(&self, error: RemoteError) {
        self.state.lock().unwrap().fail_store = Some(error);
    }

    /// Makes UID STORE succeed without reporting any flags.
    pub fn empty_store_response(&self) {
        self.state.lock().unwrap().empty_store_response = true;
    }
}

#[async_trait]
impl Connector for MockServer {
    async fn connect(&self, _config: &ImapConfig) -> RemoteResult<Box<dyn MailboxClient>> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Box::new(MockClient {
            server: self.clone(),
            selected: None,
        }))
    }
}

struct MockClient {
    server: MockServer,
    selected: Option<String>,
}

impl MockClient {
    fn log(&self, command: String) {
        self.server.state.lock().unwrap().commands.push(command);
    }

    fn with_selected<T>(&self, f: impl FnOnce(&mut MockMailbox) -> RemoteResult<T>) -> RemoteResult<T> {
        let name = self
            .selected
            .clone()
            .ok_or_else(|| RemoteError::Bad("no mailbox selected".into()))?;
        let mut state = self.server.state.lock().unwrap();
        let mailbox = state
            .mailboxes
            .get_mut(&name)
            .ok_or_else(|| RemoteError::No(format!("no mailbox {name}")))?;
        f(mailbox)
    }
}

#[async_trait]
impl MailboxClient for MockClient {
    async fn authenticate(&mut self, username: &str, _password: &str) -> RemoteResult<()> {
        self.log(format!("LOGIN {username}"));
        Ok(())
    }

    async fn select(&mut self, mailbox: &str) -> RemoteResult<MailboxStatus> {
        self.log(format!("SELECT {mailbox}"));
        let state = self.server.state.lock().unwrap();
        let mb = state
            .mailboxes
            .get(mailbox)
            .ok_or_else(|| RemoteError::No(format!("no mailbox {mailbox}")))?;
        let status = MailboxStatus {
            exists: u32::try_from(mb.messages.len()).unwrap(),
            uid_validity: Some(mb.uid_validity),
            uid_next: Some(mb.next_uid),
        };
        drop(state);
        self.selected = Some(mailbox.to_string());
        Ok(status)
    }

    async fn uid_search(&mut self, criteria: &str) -> RemoteResult<Vec<Uid>> {
        self.log(format!("SEARCH {criteria}"));
        self.with_selected(|mb| Ok(mb.messages.keys().copied().collect()))
    }

    async fn uid_fetch(&mut self, uids: &[Uid], items: FetchItems) -> RemoteResult<Vec<FetchData>> {
        self.log(format!("FETCH {} {items:?}", uids.len()));
        {
            let mut state = self.server.state.lock().unwrap();
            if state.fail_fetch_after.is_some_and(|n| state.fetches >= n) {
                return Err(RemoteError::Io("connection reset".into()));
            }
            state.fetches += 1;
        }
        self.with_selected(|mb| {
            Ok(uids
                .iter()
                .filter_map(|uid| mb.messages.get(uid).map(|m| (*uid, m)))
                .map(|(uid, m)| match items {
                    FetchItems::Summary => FetchData {
                        uid,
                        flags: Some(m.flags.clone()),
                        envelope: Some(envelope(&m.raw)),
                        body: None,
                    },
                    FetchItems::Body => FetchData {
                        uid,
                        flags: None,
                        envelope: None,
                        body: Some(m.raw.clone()),
                    },
                })
                .collect())
        })
    }

    async fn uid_store(
        &mut self,
        uids: &[Uid],
        action: StoreAction,
    ) -> RemoteResult<Vec<(Uid, Flags)>> {
        self.log(format!("STORE {} {action:?}", uids.len()));
        let (fail, empty) = {
            let mut state = self.server.state.lock().unwrap();
            (state.fail_store.take(), state.empty_store_response)
        };
        if let Some(error) = fail {
            return Err(error);
        }
        self.with_selected(|mb| {
            let mut out = Vec::new();
            for uid in uids {
                if let Some(m) = mb.messages.get_mut(uid) {
                    match &action {
                        StoreAction::AddFlags(flags) => {
                            for f in flags {
                                m.flags.insert(f.clone());
                            }
                        }
                        StoreAction::RemoveFlags(flags) => {
                            for f in flags {
                                m.flags.remove(f);
                            }
                        }
                    }
                    out.push((*uid, m.flags.clone()));
                }
            }
            Ok(if empty { Vec::new() } else { out })
        })
    }

    async fn uid_copy(&mut self, uids: &[Uid], mailbox: &str) -> RemoteResult<()> {
        self.log(format!("COPY {} {mailbox}", uids.len()));
        let source = self.selected.clone().unwrap_or_default();
        let mut state = self.server.state.lock().unwrap();
        let copied: Vec<MockMessage> = state
            .mailboxes
            .get(&source)
            .map(|mb| uids.iter().filter_map(|u| mb.messages.get(u).cloned()).collect())
            .unwrap_or_default();
        let dest = state
            .mailboxes
            .get_mut(mailbox)
            .ok_or_else(|| RemoteError::No(format!("[TRYCREATE] no mailbox {mailbox}")))?;
        for mut m in copied {
            m.flags.remove(&Flag::Deleted);
            dest.messages.insert(Uid(dest.next_uid), m);
            dest.next_uid += 1;
        }
        Ok(())
    }

    async fn expunge(&mut self) -> RemoteResult<()> {
        self.log("EXPUNGE".to_string());
        self.with_selected(|mb| {
            mb.messages.retain(|_, m| !m.flags.is_deleted());
            Ok(())
        })
    }

    async fn list(&mut self, reference: &str, pattern: &str) -> RemoteResult<Vec<MailboxInfo>> {
        self.log(format!("LIST {reference:?} {pattern:?}"));
        let state = self.server.state.lock().unwrap();
        Ok(state
            .mailboxes
            .keys()
            .filter(|name| pattern == "*" || name.as_str() == pattern)
            .map(|name| MailboxInfo {
                name: name.clone(),
                delimiter: Some('/'),
                attributes: Vec::new(),
            })
            .collect())
    }

    async fn create(&mut self, mailbox: &str) -> RemoteResult<()> {
        self.log(format!("CREATE {mailbox}"));
        let mut state = self.server.state.lock().unwrap();
        state.mailboxes.entry(mailbox.to_string()).or_insert(MockMailbox {
            uid_validity: 1,
            next_uid: 1,
            messages: BTreeMap::new(),
        });
        Ok(())
    }

    async fn append(&mut self, mailbox: &str, flags: &Flags, message: &[u8]) -> RemoteResult<()> {
        self.log(format!("APPEND {mailbox}"));
        let mut state = self.server.state.lock().unwrap();
        let mb = state
            .mailboxes
            .get_mut(mailbox)
            .ok_or_else(|| RemoteError::No(format!("no mailbox {mailbox}")))?;
        mb.messages.insert(
            Uid(mb.next_uid),
            MockMessage {
                flags: flags.clone(),
                raw: message.to_vec(),
            },
        );
        mb.next_uid += 1;
        Ok(())
    }

    async fn noop(&mut self) -> RemoteResult<()> {
        self.log("NOOP".to_string());
        Ok(())
    }

    async fn logout(&mut self) -> RemoteResult<()> {
        self.log("LOGOUT".to_string());
        Ok(())
    }
}

/// A configuration rooted in `dir`.
pub fn config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.join("data");
    config.save_directory = dir.join("saved");
    config.account.name = "test".to_string();
    config.account.from = "bob@example.com".to_string();
    config.account.imap.host = "imap.example.com".to_string();
    config.account.imap.username = "bob".to_string();
    config.account.imap.password = "secret".to_string();
    config.fetch_batch_size = 2;
    config
}

pub fn connection(server: &MockServer, config: &Config) -> Arc<Connection> {
    Arc::new(Connection::new(
        Arc::new(server.clone()),
        config.account.imap.clone(),
        Duration::from_secs(5),
    ))
}

pub async fn session(server: &MockServer, config: Config) -> Session {
    let connection = connection(server, &config);
    let cache = MailCache::new(config.mail_dir());
    let index = SearchIndex::in_memory().await.unwrap();
    Session::new(config, connection, cache, index)
}
