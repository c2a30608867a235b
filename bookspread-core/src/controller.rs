//! The navigation state machine.
//!
//! One controller owns one open document: its server-side session, its page
//! cache, and the ticket counter that decides which responses are still
//! relevant. Handles are cheap to clone so navigations can run as separate
//! tasks; state lives behind a mutex that is never held across an `.await`.
//!
//! Presentation hooks are invoked while that mutex is held, which keeps the
//! emitted event order identical to the order in which state changed. Hooks
//! must therefore not call back into the controller.
//!
//! A navigation stays `Navigating` until its spread has been announced, and
//! concurrent requests for the same page share one fetch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::{ImagePayload, PageCache, PageRecord};
use crate::config::NavigationPolicy;
use crate::error::{ErrorKind, ReaderError};
use crate::events::PresentationHooks;
use crate::remote::{PagingService, RemoteError, SpreadSnapshot};
use crate::spread::{Spread, SpreadModel};
use crate::{Command, DocumentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Ready,
    Navigating,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSession {
    pub document: DocumentId,
    pub total_pages: usize,
    pub position: usize,
}

impl BookSession {
    pub fn model(&self) -> SpreadModel {
        SpreadModel::new(self.position, self.total_pages)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSlot {
    Loaded(PageRecord),
    Failed { page: usize, message: String },
}

impl PageSlot {
    pub fn page_number(&self) -> usize {
        match self {
            PageSlot::Loaded(record) => record.page_number,
            PageSlot::Failed { page, .. } => *page,
        }
    }

    pub fn payload(&self) -> Option<&ImagePayload> {
        match self {
            PageSlot::Loaded(record) => Some(&record.payload),
            PageSlot::Failed { .. } => None,
        }
    }
}

/// A resolved spread together with whatever could be loaded for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadView {
    pub spread: Spread,
    pub total_pages: usize,
    pub left: PageSlot,
    pub right: Option<PageSlot>,
}

impl SpreadView {
    pub fn slots(&self) -> impl Iterator<Item = &PageSlot> {
        std::iter::once(&self.left).chain(self.right.iter())
    }

    pub fn failures(&self) -> impl Iterator<Item = ReaderError> + '_ {
        self.slots().filter_map(|slot| match slot {
            PageSlot::Failed { page, message } => Some(ReaderError::PageFetch {
                page: *page,
                message: message.clone(),
            }),
            PageSlot::Loaded(_) => None,
        })
    }
}

/// Outcome of a navigation request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Moved(SpreadView),
    /// Already at the first/last spread; nothing happened.
    Boundary,
    /// A newer navigation started before this one finished; its response
    /// was dropped.
    Superseded,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Current,
    Next,
    Prev,
    GoTo(usize),
}

struct Pending {
    ticket: u64,
    document: DocumentId,
    predicted: usize,
}

/// Outcome of one page fetch, shared by every navigation waiting on it.
type PageFetch = Arc<OnceCell<Result<ImagePayload, String>>>;

struct State {
    phase: Phase,
    session: Option<BookSession>,
    last_document: Option<DocumentId>,
    cache: PageCache,
    in_flight: HashMap<usize, PageFetch>,
    latest_ticket: u64,
    initializing: bool,
}

impl State {
    fn issue_ticket(&mut self) -> u64 {
        self.latest_ticket += 1;
        self.latest_ticket
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.latest_ticket == ticket && self.phase != Phase::Closed
    }
}

struct Inner {
    service: Arc<dyn PagingService>,
    hooks: Arc<dyn PresentationHooks>,
    policy: NavigationPolicy,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct NavigationController {
    inner: Arc<Inner>,
}

impl NavigationController {
    pub fn new(
        service: Arc<dyn PagingService>,
        hooks: Arc<dyn PresentationHooks>,
        policy: NavigationPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                hooks,
                policy,
                state: Mutex::new(State {
                    phase: Phase::Uninitialized,
                    session: None,
                    last_document: None,
                    cache: PageCache::new(),
                    in_flight: HashMap::new(),
                    latest_ticket: 0,
                    initializing: false,
                }),
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn policy(&self) -> NavigationPolicy {
        self.inner.policy
    }

    pub fn session(&self) -> Option<BookSession> {
        self.inner.state.lock().session.clone()
    }

    pub fn document(&self) -> Option<DocumentId> {
        self.inner.state.lock().last_document.clone()
    }

    pub fn position(&self) -> Option<usize> {
        self.inner.state.lock().session.as_ref().map(|s| s.position)
    }

    pub fn total_pages(&self) -> Option<usize> {
        self.inner.state.lock().session.as_ref().map(|s| s.total_pages)
    }

    pub fn spread(&self) -> Option<Spread> {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.model().spread())
    }

    pub fn cached_pages(&self) -> Vec<usize> {
        self.inner.state.lock().cache.pages()
    }

    pub fn is_cached(&self, page: usize) -> bool {
        self.inner.state.lock().cache.has(page)
    }

    /// Opens the server-side session for `document` and loads its first
    /// spread.
    #[instrument(skip(self, document), fields(document = %document))]
    pub async fn initialize(&self, document: DocumentId) -> Result<Navigation, ReaderError> {
        {
            let mut state = self.inner.state.lock();
            let refused = match state.phase {
                Phase::Closed => Some(ReaderError::Closed),
                Phase::Uninitialized if state.initializing => Some(ReaderError::Busy),
                Phase::Uninitialized => None,
                Phase::Ready | Phase::Navigating => Some(ReaderError::AlreadyOpen {
                    document: state
                        .session
                        .as_ref()
                        .map(|s| s.document.to_string())
                        .unwrap_or_default(),
                }),
            };
            if let Some(err) = refused {
                return Err(self.report(err));
            }
            state.initializing = true;
            self.inner.hooks.on_transition_start();
        }

        let result = self.inner.service.initialize(&document).await;

        let (ticket, model) = {
            let mut state = self.inner.state.lock();
            state.initializing = false;

            if state.phase == Phase::Closed {
                self.inner.hooks.on_transition_end();
                drop(state);
                if result.is_ok() {
                    let _ = self.dispatch_cleanup(document);
                }
                return Ok(Navigation::Closed);
            }

            let total_pages = match result {
                Ok(0) => Err(ReaderError::Initialization {
                    message: "document has no pages".to_owned(),
                }),
                Ok(total) => Ok(total),
                Err(err) => Err(ReaderError::from_initialize(err)),
            };
            let total_pages = match total_pages {
                Ok(total) => total,
                Err(err) => {
                    self.inner.hooks.on_transition_end();
                    return Err(self.report(err));
                }
            };

            state.session = Some(BookSession {
                document: document.clone(),
                total_pages,
                position: 1,
            });
            state.last_document = Some(document.clone());
            state.phase = Phase::Navigating;
            (state.issue_ticket(), SpreadModel::new(1, total_pages))
        };

        info!(total_pages = model.total_pages(), "document opened");
        self.present(ticket, document, model).await
    }

    pub async fn go_next(&self) -> Result<Navigation, ReaderError> {
        self.navigate(Step::Next).await
    }

    pub async fn go_prev(&self) -> Result<Navigation, ReaderError> {
        self.navigate(Step::Prev).await
    }

    /// Jumps directly to `page`, which becomes the left page of the spread.
    pub async fn go_to(&self, page: usize) -> Result<Navigation, ReaderError> {
        self.navigate(Step::GoTo(page)).await
    }

    /// Re-reads the server's current spread.
    pub async fn refresh(&self) -> Result<Navigation, ReaderError> {
        self.navigate(Step::Current).await
    }

    pub async fn apply(&self, command: Command) -> Result<Navigation, ReaderError> {
        match command {
            Command::NextSpread => self.go_next().await,
            Command::PrevSpread => self.go_prev().await,
            Command::GoTo { page } => self.go_to(page).await,
            Command::Refresh => self.refresh().await,
            Command::Close => self.close().map(|_| Navigation::Closed),
        }
    }

    /// Ends the session: drops the cache, invalidates in-flight requests and
    /// asks the server to clean up. The returned handle may be awaited or
    /// dropped; the cleanup runs either way.
    pub fn close(&self) -> Result<Option<JoinHandle<()>>, ReaderError> {
        let document = {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::Closed {
                return Err(self.report(ReaderError::Closed));
            }
            state.phase = Phase::Closed;
            state.issue_ticket();
            state.cache.clear();
            state.in_flight.clear();
            state.session.take().map(|session| session.document)
        };

        let Some(document) = document else {
            return Ok(None);
        };
        info!(%document, "closing document");
        Ok(self.dispatch_cleanup(document))
    }

    /// Best-effort cleanup for the last opened document, regardless of
    /// whether `close` already ran.
    pub fn unload(&self) -> Option<JoinHandle<()>> {
        let document = self.inner.state.lock().last_document.clone()?;
        debug!(%document, "unload cleanup");
        self.dispatch_cleanup(document)
    }

    pub fn unload_guard(&self) -> UnloadGuard {
        UnloadGuard {
            controller: self.clone(),
            armed: true,
        }
    }

    #[instrument(skip(self))]
    async fn navigate(&self, step: Step) -> Result<Navigation, ReaderError> {
        let Some(pending) = self.begin(step)? else {
            debug!("boundary no-op");
            return Ok(Navigation::Boundary);
        };

        let service = &self.inner.service;
        let response = match step {
            Step::Current => service.current_spread(&pending.document).await,
            Step::Next => service.navigate_next(&pending.document).await,
            Step::Prev => service.navigate_prev(&pending.document).await,
            Step::GoTo(page) => service.goto(&pending.document, page).await,
        };

        match response {
            Ok(snapshot) => self.confirm(pending, snapshot).await,
            Err(err) => self.abort(pending.ticket, err),
        }
    }

    fn begin(&self, step: Step) -> Result<Option<Pending>, ReaderError> {
        let mut state = self.inner.state.lock();
        let refused = match state.phase {
            Phase::Closed => Some(ReaderError::Closed),
            Phase::Uninitialized => Some(ReaderError::NotInitialized),
            Phase::Navigating if self.inner.policy == NavigationPolicy::Reject => {
                Some(ReaderError::Busy)
            }
            Phase::Ready | Phase::Navigating => None,
        };
        if let Some(err) = refused {
            return Err(self.report(err));
        }
        let Some(session) = state.session.as_ref() else {
            return Err(self.report(ReaderError::NotInitialized));
        };

        let model = session.model();
        let predicted = match step {
            Step::Current => model.position(),
            Step::Next if !model.can_go_next() => return Ok(None),
            Step::Next => model.predicted_next(),
            Step::Prev if !model.can_go_prev() => return Ok(None),
            Step::Prev => model.predicted_prev(),
            Step::GoTo(page) if !model.contains(page) => {
                return Err(self.report(ReaderError::OutOfRange {
                    page,
                    total: model.total_pages(),
                }));
            }
            Step::GoTo(page) => page,
        };

        let document = session.document.clone();
        state.phase = Phase::Navigating;
        let ticket = state.issue_ticket();
        self.inner.hooks.on_transition_start();
        Ok(Some(Pending {
            ticket,
            document,
            predicted,
        }))
    }

    fn abort(&self, ticket: u64, err: RemoteError) -> Result<Navigation, ReaderError> {
        let mut state = self.inner.state.lock();
        if !state.is_current(ticket) {
            debug!(ticket, %err, "dropping failure of superseded navigation");
            return Ok(Navigation::Superseded);
        }
        state.phase = Phase::Ready;
        self.inner.hooks.on_transition_end();

        if err.is_boundary() {
            debug!(%err, "server reported boundary");
            return Ok(Navigation::Boundary);
        }
        warn!(%err, "navigation failed");
        Err(self.report(ReaderError::from_navigation(err)))
    }

    async fn confirm(
        &self,
        pending: Pending,
        snapshot: SpreadSnapshot,
    ) -> Result<Navigation, ReaderError> {
        let model = {
            let mut guard = self.inner.state.lock();
            if !guard.is_current(pending.ticket) {
                debug!(ticket = pending.ticket, "dropping stale response");
                return Ok(Navigation::Superseded);
            }
            let state = &mut *guard;
            let Some(session) = state.session.as_mut() else {
                return Ok(Navigation::Superseded);
            };

            if let Some(total) = snapshot.total_pages.filter(|&total| total > 0) {
                if total != session.total_pages {
                    warn!(
                        local = session.total_pages,
                        remote = total,
                        "page count changed on server"
                    );
                    session.total_pages = total;
                }
            }

            let model = SpreadModel::new(snapshot.current_page, session.total_pages);
            if model.position() != pending.predicted {
                debug!(
                    predicted = pending.predicted,
                    confirmed = model.position(),
                    "server adjusted position"
                );
            }
            session.position = model.position();

            for page in snapshot.pages() {
                if let Some(image) = &page.image {
                    if model.contains(page.page_number) && !state.cache.has(page.page_number) {
                        state.cache.put(page.page_number, image.clone());
                    }
                }
            }
            model
        };

        self.present(pending.ticket, pending.document, model).await
    }

    /// Loads both halves of the spread at `model` and announces it if no
    /// newer navigation has started meanwhile. The phase returns to `Ready`
    /// only here, once the spread is out.
    async fn present(
        &self,
        ticket: u64,
        document: DocumentId,
        model: SpreadModel,
    ) -> Result<Navigation, ReaderError> {
        let spread = model.spread();
        let (left, right) = tokio::join!(
            self.load_page(ticket, &document, spread.left),
            async {
                match spread.right {
                    Some(page) => self.load_page(ticket, &document, page).await.map(Some),
                    None => Some(None),
                }
            }
        );

        let mut state = self.inner.state.lock();
        let (Some(left), Some(right)) = (left, right) else {
            debug!(ticket, left = spread.left, "page loads skipped for superseded spread");
            return Ok(Navigation::Superseded);
        };
        if !state.is_current(ticket) {
            debug!(ticket, left = spread.left, "dropping superseded spread");
            return Ok(Navigation::Superseded);
        }

        let view = SpreadView {
            spread,
            total_pages: model.total_pages(),
            left,
            right,
        };
        state.phase = Phase::Ready;
        for failure in view.failures() {
            self.report(failure);
        }
        self.inner.hooks.on_spread_ready(&view);
        self.inner.hooks.on_transition_end();
        drop(state);

        Ok(Navigation::Moved(view))
    }

    /// Resolves one page from the cache or the service. Returns `None` when
    /// the navigation was superseded before a fetch had to start.
    async fn load_page(
        &self,
        ticket: u64,
        document: &DocumentId,
        page: usize,
    ) -> Option<PageSlot> {
        let fetch = {
            let mut state = self.inner.state.lock();
            if let Some(record) = state.cache.get(page) {
                debug!(page, "page cache hit");
                return Some(PageSlot::Loaded(record));
            }
            if !state.is_current(ticket) {
                return None;
            }
            match state.in_flight.get(&page) {
                Some(fetch) => {
                    debug!(page, "joining in-flight page fetch");
                    Arc::clone(fetch)
                }
                None => {
                    debug!(page, "page cache miss");
                    let fetch = PageFetch::default();
                    state.in_flight.insert(page, Arc::clone(&fetch));
                    fetch
                }
            }
        };

        let outcome = fetch
            .get_or_init(|| async {
                self.inner
                    .service
                    .fetch_page(document, page)
                    .await
                    .map_err(|err| {
                        warn!(page, %err, "page fetch failed");
                        err.to_string()
                    })
            })
            .await
            .clone();

        {
            let mut state = self.inner.state.lock();
            if state
                .in_flight
                .get(&page)
                .is_some_and(|current| Arc::ptr_eq(current, &fetch))
            {
                state.in_flight.remove(&page);
            }
            if let Ok(payload) = &outcome {
                if state.phase != Phase::Closed {
                    state.cache.put(page, payload.clone());
                }
            }
        }

        Some(match outcome {
            Ok(payload) => PageSlot::Loaded(PageRecord {
                page_number: page,
                payload,
            }),
            Err(message) => PageSlot::Failed { page, message },
        })
    }

    fn dispatch_cleanup(&self, document: DocumentId) -> Option<JoinHandle<()>> {
        let service = Arc::clone(&self.inner.service);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(async move {
                if let Err(err) = service.cleanup(&document).await {
                    debug!(%document, %err, "session cleanup failed");
                }
            })),
            Err(_) => {
                warn!(%document, "no async runtime, skipping session cleanup");
                None
            }
        }
    }

    fn report(&self, err: ReaderError) -> ReaderError {
        let kind: ErrorKind = err.kind();
        self.inner.hooks.on_error(kind, &err.to_string());
        err
    }
}

/// Issues the unload cleanup when dropped, unless disarmed.
pub struct UnloadGuard {
    controller: NavigationController,
    armed: bool,
}

impl UnloadGuard {
    /// For callers that run the unload themselves on the normal exit path.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for UnloadGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.controller.unload();
        }
    }
}
