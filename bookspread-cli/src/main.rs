use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use bookspread_core::{
    Command, DocumentId, ErrorKind, EventQueue, NavigationController, NavigationPolicy, PageSlot,
    ReaderConfig, ReaderEvent, SpreadView, UnloadGuard,
};
use bookspread_remote::HttpPagingService;
use bookspread_tty::{
    decode_payload, fit_image, write_status_line, EventMapper, KittyRenderer, PageImage, Pane,
    SpreadLayout, UiEvent, Viewport,
};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{
    self, DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture, Event,
};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "bookspread",
    version,
    about = "Two-page terminal reader for remotely rendered books"
)]
struct Args {
    /// Identifier of the book on the server
    document: String,

    /// Server base URL, overrides the config file
    #[arg(short = 's', long = "server")]
    server: Option<String>,

    /// Config file to use instead of the per-user one
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Cookie header forwarded with every request
    #[arg(long = "cookie")]
    cookie: Option<String>,

    /// Page to open the book on (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Refuse page turns while one is still loading
    #[arg(long = "reject-while-busy")]
    reject_while_busy: bool,
}

impl Args {
    fn apply_to(&self, config: &mut ReaderConfig) {
        if let Some(server) = &self.server {
            config.server.base_url = server.clone();
        }
        if let Some(cookie) = &self.cookie {
            config.server.cookie = Some(cookie.clone());
        }
        if self.reject_while_busy {
            config.navigation.policy = NavigationPolicy::Reject;
        }
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, EnableMouseCapture, EnableFocusChange, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(
            stdout,
            DisableMouseCapture,
            DisableFocusChange,
            cursor::Show
        );
        let _ = terminal::disable_raw_mode();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "bookspread", "bookspread")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let mut config = ReaderConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    args.apply_to(&mut config);

    let service = HttpPagingService::new(&config.server)
        .with_context(|| format!("invalid server settings for {}", config.server.base_url))?;
    let server = service.base_url().clone();
    let events = EventQueue::new();
    let controller = NavigationController::new(
        Arc::new(service),
        Arc::new(events.clone()),
        config.navigation.policy,
    );
    let unload_guard = controller.unload_guard();

    let document = DocumentId::from(args.document.clone());
    info!(%document, %server, policy = ?controller.policy(), "opening book");
    controller
        .initialize(document.clone())
        .await
        .with_context(|| format!("failed to open {}", document))?;
    if let Some(page) = args.page.filter(|&page| page != 1) {
        if let Err(err) = controller.go_to(page).await {
            warn!(page, %err, "initial page rejected");
        }
    }

    let raw = RawModeGuard::new()?;
    let mut renderer = KittyRenderer::new(io::stdout());
    let mut mapper = EventMapper::with_swipe_threshold(config.input.swipe_threshold);
    let mut screen = Screen::new(document.to_string(), config.display.error_banner);
    let mut pages_dirty = true;
    let mut status_dirty = true;

    loop {
        for event in events.drain() {
            match screen.apply(event) {
                Change::Pages => pages_dirty = true,
                Change::Status => status_dirty = true,
            }
        }
        if screen.expire_banner(Instant::now()) {
            status_dirty = true;
        }
        if let Some(displayed) = &screen.displayed {
            mapper.set_position(displayed.view.spread.left, displayed.view.total_pages);
        }

        if pages_dirty {
            redraw(&mut renderer, &screen, mapper.pending_input().as_deref())?;
            pages_dirty = false;
            status_dirty = false;
        } else if status_dirty {
            let viewport = Viewport::from(terminal::window_size()?);
            draw_status_line(
                &mut renderer,
                viewport,
                &screen.status(mapper.pending_input().as_deref()),
            )?;
            status_dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ev = event::read()?;
            if matches!(ev, Event::Resize(..)) {
                pages_dirty = true;
                continue;
            }
            match handle_event(mapper.map_event(ev), &controller) {
                LoopAction::Continue => {}
                LoopAction::ContinueRedraw => status_dirty = true,
                LoopAction::Quit => break,
            }
        }
    }

    renderer.delete_images()?;
    renderer.clear_all()?;
    drop(raw);

    shut_down(&controller, unload_guard, config.display.unload_grace).await;
    Ok(())
}

/// Closes the book and gives its session cleanup up to `grace` to reach the
/// server. The guard is disarmed so the cleanup is sent once.
async fn shut_down(
    controller: &NavigationController,
    unload_guard: UnloadGuard,
    grace: Duration,
) {
    unload_guard.disarm();
    let cleanup = match controller.close() {
        Ok(cleanup) => cleanup,
        Err(err) => {
            debug!(%err, "close on exit");
            None
        }
    };
    if let Some(cleanup) = cleanup {
        if tokio::time::timeout(grace, cleanup).await.is_err() {
            warn!("session cleanup did not finish before exit");
        }
    }
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

fn handle_event(event: UiEvent, controller: &NavigationController) -> LoopAction {
    match event {
        UiEvent::Command(command) => {
            spawn_command(controller, command);
            LoopAction::ContinueRedraw
        }
        UiEvent::BeginPageEntry { .. }
        | UiEvent::PageEntryChanged { .. }
        | UiEvent::PageEntryClosed => LoopAction::ContinueRedraw,
        UiEvent::Exit => LoopAction::Quit,
        UiEvent::None => LoopAction::Continue,
    }
}

/// Runs `command` in the background; its outcome reaches the screen through
/// the event queue.
fn spawn_command(controller: &NavigationController, command: Command) {
    let controller = controller.clone();
    tokio::spawn(async move {
        match controller.apply(command).await {
            Ok(outcome) => debug!(?command, ?outcome, "command finished"),
            Err(err) => debug!(?command, %err, "command failed"),
        }
    });
}

enum PageDisplay {
    Image(PageImage),
    Missing(String),
}

impl PageDisplay {
    fn prepare(slot: &PageSlot) -> Self {
        let page = slot.page_number();
        match slot.payload().map(decode_payload) {
            Some(Ok(image)) => PageDisplay::Image(image),
            Some(Err(err)) => {
                warn!(page, %err, "page image cannot be displayed");
                PageDisplay::Missing(format!("page {page} cannot be displayed"))
            }
            None => PageDisplay::Missing(format!("page {page} unavailable")),
        }
    }
}

struct Displayed {
    view: SpreadView,
    left: PageDisplay,
    right: Option<PageDisplay>,
}

struct Banner {
    message: String,
    /// `None` for errors the reader cannot recover from; those stay up.
    expires: Option<Instant>,
}

#[derive(Debug, PartialEq, Eq)]
enum Change {
    Pages,
    Status,
}

/// What the terminal currently shows, fed from the controller's events.
struct Screen {
    title: String,
    banner_ttl: Duration,
    displayed: Option<Displayed>,
    loading: bool,
    banner: Option<Banner>,
}

impl Screen {
    fn new(title: String, banner_ttl: Duration) -> Self {
        Self {
            title,
            banner_ttl,
            displayed: None,
            loading: false,
            banner: None,
        }
    }

    fn apply(&mut self, event: ReaderEvent) -> Change {
        match event {
            ReaderEvent::TransitionStarted => {
                self.loading = true;
                Change::Status
            }
            ReaderEvent::TransitionEnded => {
                self.loading = false;
                Change::Status
            }
            ReaderEvent::SpreadReady(view) => {
                let left = PageDisplay::prepare(&view.left);
                let right = view.right.as_ref().map(PageDisplay::prepare);
                self.displayed = Some(Displayed { view, left, right });
                Change::Pages
            }
            ReaderEvent::Error { kind, message } => {
                self.banner = Some(Banner {
                    message: format!("{}: {}", error_label(kind), message),
                    expires: kind
                        .is_recoverable()
                        .then(|| Instant::now() + self.banner_ttl),
                });
                Change::Status
            }
        }
    }

    fn expire_banner(&mut self, now: Instant) -> bool {
        let expired = self
            .banner
            .as_ref()
            .and_then(|banner| banner.expires)
            .is_some_and(|expires| expires <= now);
        if expired {
            self.banner = None;
            return true;
        }
        false
    }

    fn status(&self, pending_input: Option<&str>) -> String {
        let mut status = self.title.clone();
        if let Some(displayed) = &self.displayed {
            let spread = displayed.view.spread;
            match spread.right {
                Some(right) => status.push_str(&format!(
                    " | pages {}-{} of {}",
                    spread.left, right, displayed.view.total_pages
                )),
                None => status.push_str(&format!(
                    " | page {} of {}",
                    spread.left, displayed.view.total_pages
                )),
            }
        }
        if self.loading {
            status.push_str(" | loading");
        }
        if let Some(banner) = &self.banner {
            status.push_str(" | ");
            status.push_str(&banner.message);
        }
        if let Some(pending) = pending_input.filter(|s| !s.is_empty()) {
            status.push_str(" | ");
            status.push_str(pending);
        }
        status
    }
}

fn error_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Network => "network error",
        ErrorKind::PageFetch => "page failed",
        ErrorKind::OutOfRange => "no such page",
        ErrorKind::Busy => "busy",
        ErrorKind::Service => "server error",
        ErrorKind::Initialization
        | ErrorKind::Closed
        | ErrorKind::NotInitialized
        | ErrorKind::AlreadyOpen => "error",
    }
}

fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    screen: &Screen,
    pending_input: Option<&str>,
) -> Result<()> {
    let viewport = Viewport::from(terminal::window_size()?);

    renderer.begin_sync_update()?;
    renderer.delete_images()?;
    renderer.clear_all()?;

    if let Some(displayed) = &screen.displayed {
        let layout = SpreadLayout::compute(viewport, displayed.right.is_some());
        draw_page(renderer, 1, &displayed.left, layout.left, &viewport)?;
        if let (Some(page), Some(pane)) = (&displayed.right, layout.right) {
            draw_page(renderer, 2, page, pane, &viewport)?;
        }
    }

    draw_status_line(renderer, viewport, &screen.status(pending_input))?;
    renderer.end_sync_update()?;
    Ok(())
}

fn draw_page(
    renderer: &mut KittyRenderer<io::Stdout>,
    image_id: u32,
    page: &PageDisplay,
    pane: Pane,
    viewport: &Viewport,
) -> Result<()> {
    match page {
        PageDisplay::Image(image) => {
            let target = fit_image(pane, image.width, image.height, viewport);
            renderer.draw(image_id, image, target)
        }
        PageDisplay::Missing(note) => renderer.draw_placeholder(pane, note),
    }
}

fn draw_status_line(
    renderer: &mut KittyRenderer<io::Stdout>,
    viewport: Viewport,
    status: &str,
) -> Result<()> {
    let status_row = viewport.rows.saturating_sub(1);
    let width = usize::from(viewport.columns.max(1));
    let line: String = status.chars().take(width).collect();
    let mut writer = renderer.writer();
    crossterm::execute!(
        &mut writer,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(&mut writer, &line)?;
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;

    let file_appender = tracing_appender::rolling::never(log_dir, "bookspread.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal belongs to the reader view, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use async_trait::async_trait;
    use bookspread_core::{
        ImagePayload, PageRecord, PagingService, Phase, RemoteError, RemotePage, Spread,
        SpreadSnapshot,
    };

    /// Four-page book that only counts cleanups.
    #[derive(Default)]
    struct CountingService {
        cleanups: AtomicUsize,
    }

    impl CountingService {
        fn snapshot(page: usize) -> SpreadSnapshot {
            let entry = |page_number: usize| RemotePage {
                page_number,
                image: Some(ImagePayload::from("data:image/png;base64,")),
            };
            SpreadSnapshot {
                current_page: page,
                total_pages: Some(4),
                left: Some(entry(page)),
                right: (page < 4).then(|| entry(page + 1)),
            }
        }
    }

    #[async_trait]
    impl PagingService for CountingService {
        async fn initialize(&self, _document: &DocumentId) -> Result<usize, RemoteError> {
            Ok(4)
        }

        async fn current_spread(
            &self,
            _document: &DocumentId,
        ) -> Result<SpreadSnapshot, RemoteError> {
            Ok(Self::snapshot(1))
        }

        async fn navigate_next(
            &self,
            _document: &DocumentId,
        ) -> Result<SpreadSnapshot, RemoteError> {
            Ok(Self::snapshot(3))
        }

        async fn navigate_prev(
            &self,
            _document: &DocumentId,
        ) -> Result<SpreadSnapshot, RemoteError> {
            Ok(Self::snapshot(1))
        }

        async fn goto(
            &self,
            _document: &DocumentId,
            page: usize,
        ) -> Result<SpreadSnapshot, RemoteError> {
            Ok(Self::snapshot(page))
        }

        async fn fetch_page(
            &self,
            _document: &DocumentId,
            _page: usize,
        ) -> Result<ImagePayload, RemoteError> {
            Ok(ImagePayload::from("data:image/png;base64,"))
        }

        async fn cleanup(&self, _document: &DocumentId) -> Result<(), RemoteError> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn open_book() -> (NavigationController, Arc<CountingService>) {
        let service = Arc::new(CountingService::default());
        let controller = NavigationController::new(
            service.clone(),
            Arc::new(EventQueue::new()),
            NavigationPolicy::LatestWins,
        );
        controller.initialize("book".into()).await.unwrap();
        (controller, service)
    }

    fn view(left: usize, right: Option<usize>, total: usize) -> SpreadView {
        let slot = |page: usize| {
            PageSlot::Failed {
                page,
                message: "offline".into(),
            }
        };
        SpreadView {
            spread: Spread { left, right },
            total_pages: total,
            left: slot(left),
            right: right.map(slot),
        }
    }

    fn screen() -> Screen {
        Screen::new("book".into(), Duration::from_secs(5))
    }

    #[test]
    fn args_override_config() {
        let args = Args::parse_from([
            "bookspread",
            "book-1",
            "--server",
            "http://reader.test",
            "--cookie",
            "session=1",
            "--reject-while-busy",
        ]);
        let mut config = ReaderConfig::default();
        args.apply_to(&mut config);
        assert_eq!(config.server.base_url, "http://reader.test");
        assert_eq!(config.server.cookie.as_deref(), Some("session=1"));
        assert_eq!(config.navigation.policy, NavigationPolicy::Reject);
    }

    #[test]
    fn status_shows_spread_and_last_page() {
        let mut screen = screen();
        assert_eq!(screen.apply(ReaderEvent::SpreadReady(view(3, Some(4), 10))), Change::Pages);
        assert_eq!(screen.status(None), "book | pages 3-4 of 10");

        screen.apply(ReaderEvent::SpreadReady(view(7, None, 7)));
        assert_eq!(screen.status(Some("page: 5")), "book | page 7 of 7 | page: 5");
    }

    #[test]
    fn loading_follows_transitions() {
        let mut screen = screen();
        assert_eq!(screen.apply(ReaderEvent::TransitionStarted), Change::Status);
        assert!(screen.status(None).ends_with("| loading"));
        screen.apply(ReaderEvent::TransitionEnded);
        assert_eq!(screen.status(None), "book");
    }

    #[test]
    fn error_banner_expires() {
        let mut screen = screen();
        screen.apply(ReaderEvent::Error {
            kind: ErrorKind::Network,
            message: "connection reset".into(),
        });
        assert_eq!(screen.status(None), "book | network error: connection reset");

        assert!(!screen.expire_banner(Instant::now()));
        assert!(screen.expire_banner(Instant::now() + Duration::from_secs(6)));
        assert_eq!(screen.status(None), "book");
    }

    #[test]
    fn fatal_errors_keep_their_banner() {
        let mut screen = screen();
        screen.apply(ReaderEvent::Error {
            kind: ErrorKind::Initialization,
            message: "not found".into(),
        });
        assert!(!screen.expire_banner(Instant::now() + Duration::from_secs(60)));
        assert_eq!(screen.status(None), "book | error: not found");
    }

    #[tokio::test]
    async fn exit_sends_one_cleanup() {
        let (controller, service) = open_book().await;
        let guard = controller.unload_guard();

        shut_down(&controller, guard, Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert_eq!(controller.phase(), Phase::Closed);
        assert_eq!(service.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exit_after_close_does_not_repeat_cleanup() {
        let (controller, service) = open_book().await;
        let guard = controller.unload_guard();
        if let Some(cleanup) = controller.close().unwrap() {
            cleanup.await.unwrap();
        }

        shut_down(&controller, guard, Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert_eq!(service.cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_payloads_become_placeholders() {
        let failed = PageSlot::Failed {
            page: 4,
            message: "500".into(),
        };
        assert!(matches!(
            PageDisplay::prepare(&failed),
            PageDisplay::Missing(ref note) if note == "page 4 unavailable"
        ));

        let garbled = PageSlot::Loaded(PageRecord {
            page_number: 5,
            payload: ImagePayload::from("data:image/png;base64,AAAA"),
        });
        assert!(matches!(
            PageDisplay::prepare(&garbled),
            PageDisplay::Missing(ref note) if note == "page 5 cannot be displayed"
        ));
    }
}
