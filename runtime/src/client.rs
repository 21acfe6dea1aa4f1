//! Browser-free client host.
//!
//! [`ClientHost`] drives a client [`Application`] the way in-browser navigation would:
//! a [`History`] of [`Location`]s, requests synthesized from the current location, and
//! a [`Container`] standing in for the container element and document head.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use isomorph_core::config::Target;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::app::Application;
use crate::context::{Context, RawRequest, RawResponse};
use crate::error::ClientError;
use crate::render::{HeadTags, extract_container, extract_snapshot};

/// One history entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Path, always starting with `/`
    pub pathname: String,
    /// Query including the leading `?`, or empty
    pub search: String,
    /// Fragment including the leading `#`, or empty
    pub hash: String,
    /// Unique entry key
    pub key: String,
}

impl Location {
    /// Location for `path`, with a fresh key.
    #[must_use]
    pub fn new(path: &str) -> Self {
        let parts = parse_path(path);
        Self {
            pathname: parts.pathname.unwrap_or_else(|| "/".to_string()),
            search: parts.search.unwrap_or_default(),
            hash: parts.hash.unwrap_or_default(),
            key: create_key(),
        }
    }

    /// `pathname + search + hash`.
    #[must_use]
    pub fn href(&self) -> String {
        format!("{}{}{}", self.pathname, self.search, self.hash)
    }

    /// Resolve `to` against this location.
    ///
    /// A path replaces everything; a bare `?search` keeps the pathname, a bare `#hash`
    /// keeps pathname and search.
    fn resolve(&self, to: &str) -> Self {
        let parts = parse_path(to);
        let (pathname, search) = match (parts.pathname, parts.search) {
            (Some(pathname), search) => (pathname, search.unwrap_or_default()),
            (None, Some(search)) => (self.pathname.clone(), search),
            (None, None) => (self.pathname.clone(), self.search.clone()),
        };
        Self {
            pathname,
            search,
            hash: parts.hash.unwrap_or_default(),
            key: create_key(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.pathname, self.search, self.hash)
    }
}

fn create_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// The parts present in a path string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialPath {
    /// Path before `?` and `#`
    pub pathname: Option<String>,
    /// `?...` up to the hash
    pub search: Option<String>,
    /// `#...`
    pub hash: Option<String>,
}

/// Split `path` into pathname, search and hash. The hash is split off first.
#[must_use]
pub fn parse_path(path: &str) -> PartialPath {
    let mut parts = PartialPath::default();
    let mut rest = path;

    if let Some(index) = rest.find('#') {
        parts.hash = Some(rest[index..].to_string());
        rest = &rest[..index];
    }
    if let Some(index) = rest.find('?') {
        parts.search = Some(rest[index..].to_string());
        rest = &rest[..index];
    }
    if !rest.is_empty() {
        parts.pathname = Some(rest.to_string());
    }
    parts
}

/// How the current entry was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationAction {
    /// Moved through existing entries, or the initial load
    Pop,
    /// Added an entry
    Push,
    /// Replaced the current entry
    Replace,
}

/// A change of the current entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// How the entry was reached
    pub action: NavigationAction,
    /// The new current entry
    pub location: Location,
}

/// Handle returned by [`History::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn Fn(&Navigation) + Send + Sync>;

/// In-memory session history.
pub struct History {
    entries: Vec<Location>,
    index: usize,
    listeners: BTreeMap<ListenerId, Listener>,
    next_listener: u64,
}

impl History {
    /// History with a single entry for `path`.
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            entries: vec![Location::new(path)],
            index: 0,
            listeners: BTreeMap::new(),
            next_listener: 0,
        }
    }

    /// The current entry.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.entries[self.index]
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: a history has at least one entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of the current entry.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Add an entry after the current one, dropping any forward entries.
    pub fn push(&mut self, to: &str) -> Navigation {
        let location = self.location().resolve(to);
        self.entries.truncate(self.index + 1);
        self.entries.push(location);
        self.index = self.entries.len() - 1;
        self.notify(NavigationAction::Push)
    }

    /// Replace the current entry.
    pub fn replace(&mut self, to: &str) -> Navigation {
        let location = self.location().resolve(to);
        self.entries[self.index] = location;
        self.notify(NavigationAction::Replace)
    }

    /// Move `delta` entries. Returns `None` when the target is out of range.
    pub fn go(&mut self, delta: isize) -> Option<Navigation> {
        let target = self.index.checked_add_signed(delta)?;
        if target >= self.entries.len() {
            return None;
        }
        self.index = target;
        Some(self.notify(NavigationAction::Pop))
    }

    /// `go(-1)`.
    pub fn back(&mut self) -> Option<Navigation> {
        self.go(-1)
    }

    /// `go(1)`.
    pub fn forward(&mut self) -> Option<Navigation> {
        self.go(1)
    }

    /// Call `listener` on every navigation.
    pub fn listen<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&Navigation) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.insert(id, Box::new(listener));
        id
    }

    /// Stop calling a listener. Returns whether it was registered.
    pub fn unlisten(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    fn notify(&self, action: NavigationAction) -> Navigation {
        let navigation = Navigation {
            action,
            location: self.location().clone(),
        };
        for listener in self.listeners.values() {
            listener(&navigation);
        }
        navigation
    }
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("entries", &self.entries)
            .field("index", &self.index)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// What the simulated document shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientDocument {
    /// Container element markup
    pub html: String,
    /// Document title
    pub title: String,
    /// Meta description
    pub description: String,
    /// Meta author
    pub author: String,
    /// Status of the last dispatch
    pub status: Option<u16>,
}

/// The container element and document head, shared by every dispatch.
#[derive(Debug, Clone, Default)]
pub struct Container(Arc<Mutex<ClientDocument>>);

impl Container {
    /// A copy of the current document.
    #[must_use]
    pub fn document(&self) -> ClientDocument {
        self.0.lock().clone()
    }

    /// Current container markup.
    #[must_use]
    pub fn html(&self) -> String {
        self.0.lock().html.clone()
    }

    /// Update title, description and author.
    pub fn apply_head(&self, head: &HeadTags) {
        let mut document = self.0.lock();
        document.title.clone_from(&head.title);
        document.description.clone_from(&head.description);
        document.author.clone_from(&head.author);
    }

    /// Response sink writing into this container.
    #[must_use]
    pub fn sink(&self) -> Box<dyn RawResponse> {
        Box::new(ContainerSink {
            container: self.clone(),
            headers: BTreeMap::new(),
        })
    }

    fn set_html(&self, html: String) {
        self.0.lock().html = html;
    }
}

/// [`RawResponse`] for one client dispatch.
#[derive(Debug)]
pub struct ContainerSink {
    container: Container,
    headers: BTreeMap<String, String>,
}

impl RawResponse for ContainerSink {
    fn set_status(&mut self, code: u16, _reason: Option<&str>) {
        self.container.0.lock().status = Some(code);
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    fn remove_header(&mut self, name: &str) {
        self.headers.remove(&name.to_ascii_lowercase());
    }

    fn end(&mut self, body: String) {
        self.container.set_html(body);
    }
}

/// Scheme, host and port the client pretends to be served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// `http` or `https`
    pub protocol: String,
    /// Host name without port
    pub hostname: String,
    /// Port, when not the default
    pub port: Option<u16>,
}

impl Origin {
    /// `http://hostname`.
    #[must_use]
    pub fn http(hostname: impl Into<String>) -> Self {
        Self {
            protocol: "http".to_string(),
            hostname: hostname.into(),
            port: None,
        }
    }

    /// Set the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Host name with the port, as in a `Host` header.
    #[must_use]
    pub fn host(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.hostname),
            None => self.hostname.clone(),
        }
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self::http("localhost")
    }
}

/// Runs a client application against a simulated history and container.
pub struct ClientHost {
    app: Arc<Application>,
    origin: Origin,
    user_agent: Option<String>,
    history: Mutex<History>,
    container: Container,
}

impl ClientHost {
    /// Host for `app`, starting at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::WrongTarget`] if `app` is not configured for the client.
    pub fn new(app: Arc<Application>, origin: Origin, path: &str) -> Result<Self, ClientError> {
        let target = app.config().target;
        if target != Target::Client {
            return Err(ClientError::WrongTarget(target));
        }
        Ok(Self {
            app,
            origin,
            user_agent: None,
            history: Mutex::new(History::new(path)),
            container: Container::default(),
        })
    }

    /// Send `user_agent` with every synthesized request.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// The application.
    #[must_use]
    pub const fn app(&self) -> &Arc<Application> {
        &self.app
    }

    /// The simulated container.
    #[must_use]
    pub const fn container(&self) -> &Container {
        &self.container
    }

    /// The current location.
    #[must_use]
    pub fn location(&self) -> Location {
        self.history.lock().location().clone()
    }

    /// Call `listener` on every navigation.
    pub fn listen<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Navigation) + Send + Sync + 'static,
    {
        self.history.lock().listen(listener)
    }

    /// Stop calling a listener.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.history.lock().unlisten(id)
    }

    /// Take over a server-rendered document: install its snapshot and show its
    /// container markup until the first dispatch replaces it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Snapshot`] if the document carries no readable snapshot.
    pub fn boot_from_document(&self, document: &str) -> Result<(), ClientError> {
        let common = &self.app.config().common;
        let snapshot = extract_snapshot(document, &common.app_state_name)?;
        if !self.app.host().install_snapshot(snapshot) {
            tracing::warn!("Hydration snapshot already installed, keeping the first one");
        }
        if let Some(html) = extract_container(document, &common.container_element_id) {
            self.container.set_html(html.to_string());
        }
        Ok(())
    }

    /// Dispatch the current location, as on page load.
    pub async fn start(&self) -> Context {
        let location = self.location();
        self.dispatch(NavigationAction::Pop, &location).await
    }

    /// Push `to` and dispatch it.
    pub async fn navigate(&self, to: &str) -> Context {
        let navigation = self.history.lock().push(to);
        self.dispatch(navigation.action, &navigation.location).await
    }

    /// Replace the current entry with `to` and dispatch it.
    pub async fn replace(&self, to: &str) -> Context {
        let navigation = self.history.lock().replace(to);
        self.dispatch(navigation.action, &navigation.location).await
    }

    /// Move `delta` entries and dispatch the new entry; `None` when out of range.
    pub async fn go(&self, delta: isize) -> Option<Context> {
        let navigation = self.history.lock().go(delta)?;
        Some(self.dispatch(navigation.action, &navigation.location).await)
    }

    /// `go(-1)`.
    pub async fn back(&self) -> Option<Context> {
        self.go(-1).await
    }

    /// `go(1)`.
    pub async fn forward(&self) -> Option<Context> {
        self.go(1).await
    }

    /// The platform request for `location`.
    #[must_use]
    pub fn raw_request(&self, location: &Location) -> RawRequest {
        let mut raw = RawRequest::get(location.href());
        raw.hostname = Some(self.origin.host());
        raw.protocol = Some(self.origin.protocol.clone());
        raw.secure = self.origin.protocol == "https";
        match &self.user_agent {
            Some(user_agent) => raw.with_header("user-agent", user_agent),
            None => raw,
        }
    }

    #[tracing::instrument(skip_all, fields(action = ?action, location = %location))]
    async fn dispatch(&self, action: NavigationAction, location: &Location) -> Context {
        let raw = self.raw_request(location);
        let ctx = self.app.handle(raw, self.container.sink()).await;
        if let Some(head) = ctx.extensions().get::<HeadTags>() {
            self.container.apply_head(head);
        }
        ctx
    }
}

impl fmt::Debug for ClientHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHost")
            .field("origin", &self.origin)
            .field("history", &*self.history.lock())
            .finish_non_exhaustive()
    }
}
