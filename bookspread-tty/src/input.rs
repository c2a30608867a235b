use bookspread_core::Command;
use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Command(Command),
    BeginPageEntry { input: String },
    PageEntryChanged { input: String },
    /// The prompt closed without producing a jump.
    PageEntryClosed,
    Exit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    PageEntry,
}

/// Resolves a committed page-entry value. Empty, out-of-range and unchanged
/// values produce nothing.
pub fn page_entry_target(input: &str, current: usize, total: usize) -> Option<usize> {
    let page = input.parse::<usize>().ok()?;
    ((1..=total).contains(&page) && page != current).then_some(page)
}

/// Turns a left-button drag into a page turn once it has travelled more than
/// `threshold` columns horizontally.
#[derive(Debug, Clone)]
pub struct SwipeTracker {
    threshold: u16,
    origin: Option<u16>,
}

impl SwipeTracker {
    pub fn new(threshold: u16) -> Self {
        Self {
            threshold,
            origin: None,
        }
    }

    pub fn track(&mut self, event: &MouseEvent) -> Option<Command> {
        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                self.origin = Some(event.column);
                None
            }
            MouseEventKind::Up(MouseButton::Left) => {
                let origin = self.origin.take()?;
                let delta = i32::from(event.column) - i32::from(origin);
                if delta.unsigned_abs() <= u32::from(self.threshold) {
                    return None;
                }
                Some(if delta < 0 {
                    Command::NextSpread
                } else {
                    Command::PrevSpread
                })
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.origin = None;
    }
}

impl Default for SwipeTracker {
    fn default() -> Self {
        Self::new(6)
    }
}

#[derive(Debug, Default)]
pub struct EventMapper {
    mode: InputMode,
    entry_buffer: String,
    current_page: usize,
    total_pages: usize,
    swipe: SwipeTracker,
}

impl EventMapper {
    const MAX_ENTRY_DIGITS: usize = 9;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_swipe_threshold(threshold: u16) -> Self {
        Self {
            swipe: SwipeTracker::new(threshold),
            ..Self::default()
        }
    }

    /// Position the page-entry prompt starts from and validates against.
    pub fn set_position(&mut self, current_page: usize, total_pages: usize) {
        self.current_page = current_page;
        self.total_pages = total_pages;
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.entry_buffer.clear();
            self.swipe.reset();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::PageEntry => self.map_event_page_entry(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code,
                modifiers,
                kind: KeyEventKind::Press | KeyEventKind::Repeat,
                ..
            }) => match (code, modifiers) {
                (KeyCode::Right, _) | (KeyCode::Char(' '), _) => {
                    UiEvent::Command(Command::NextSpread)
                }
                (KeyCode::Left, _) => UiEvent::Command(Command::PrevSpread),
                (KeyCode::Char('g'), KeyModifiers::NONE)
                | (KeyCode::Char('G'), KeyModifiers::SHIFT | KeyModifiers::NONE) => {
                    self.set_mode(InputMode::PageEntry);
                    if self.current_page > 0 {
                        self.entry_buffer = self.current_page.to_string();
                    }
                    UiEvent::BeginPageEntry {
                        input: self.entry_buffer.clone(),
                    }
                }
                (KeyCode::Char('r'), KeyModifiers::NONE) => UiEvent::Command(Command::Refresh),
                (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                    UiEvent::Exit
                }
                (KeyCode::Esc, _) | (KeyCode::Char('q'), _) => UiEvent::Exit,
                _ => UiEvent::None,
            },
            Event::Mouse(mouse) => match self.swipe.track(&mouse) {
                Some(command) => UiEvent::Command(command),
                None => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn map_event_page_entry(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code,
                kind: KeyEventKind::Press | KeyEventKind::Repeat,
                ..
            }) => match code {
                KeyCode::Esc => {
                    self.set_mode(InputMode::Normal);
                    UiEvent::PageEntryClosed
                }
                KeyCode::Enter => self.commit_page_entry(),
                KeyCode::Backspace => {
                    self.entry_buffer.pop();
                    UiEvent::PageEntryChanged {
                        input: self.entry_buffer.clone(),
                    }
                }
                KeyCode::Char(c)
                    if c.is_ascii_digit() && self.entry_buffer.len() < Self::MAX_ENTRY_DIGITS =>
                {
                    self.entry_buffer.push(c);
                    UiEvent::PageEntryChanged {
                        input: self.entry_buffer.clone(),
                    }
                }
                _ => UiEvent::None,
            },
            Event::FocusLost => self.commit_page_entry(),
            _ => UiEvent::None,
        }
    }

    fn commit_page_entry(&mut self) -> UiEvent {
        let target = page_entry_target(&self.entry_buffer, self.current_page, self.total_pages);
        self.set_mode(InputMode::Normal);
        match target {
            Some(page) => UiEvent::Command(Command::GoTo { page }),
            None => UiEvent::PageEntryClosed,
        }
    }

    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::PageEntry => Some(format!("page: {}", self.entry_buffer)),
            InputMode::Normal => None,
        }
    }
}
