//! Terminal UI.
//!
//! Two views mirroring the session state: a sign-in form while no identity
//! is active, and the task list once one is. The UI owns no task state — it
//! renders the store's watch snapshots and forwards key events to the
//! session manager and the store. Remote failures from user actions are
//! logged, not rendered; the only user-visible outcome of a failed write is
//! that nothing changes.
//!
//! Keys, list view: Tab switches focus between the input line and the list;
//! Enter adds (input) or toggles (list); Space toggles; Up/Down move the
//! selection; Ctrl-L signs out; Esc or Ctrl-C quits.

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use futures_util::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::{Frame, Terminal};
use tracing::warn;

use crate::backend::{Identity, Task};
use crate::store::SyncPhase;
use crate::AppContext;

const TITLE: &str = "📝 QuickSync List";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SignInField {
    #[default]
    Email,
    Token,
}

#[derive(Debug, Default)]
struct SignInForm {
    email: String,
    token: String,
    field: SignInField,
    notice: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ListFocus {
    #[default]
    Input,
    List,
}

#[derive(Debug, Default)]
struct ListView {
    input: String,
    focus: ListFocus,
    selected: usize,
}

pub struct Tui {
    ctx: AppContext,
    sign_in: SignInForm,
    list: ListView,
}

impl Tui {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            sign_in: SignInForm::default(),
            list: ListView::default(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal).await;

        // Always restore the terminal, even on error.
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    ) -> Result<()> {
        let mut events = EventStream::new();
        let mut identity_rx = self.ctx.session.identity();
        let mut tasks_rx = self.ctx.store.tasks();
        let mut phase_rx = self.ctx.store.phase();

        loop {
            let identity = identity_rx.borrow_and_update().clone();
            let tasks = tasks_rx.borrow_and_update().clone();
            let phase = *phase_rx.borrow_and_update();

            self.list.selected = self.list.selected.min(tasks.len().saturating_sub(1));

            terminal.draw(|frame| match &identity {
                None => self.draw_sign_in(frame),
                Some(identity) => self.draw_list(frame, identity, &tasks, phase),
            })?;

            tokio::select! {
                maybe_event = events.next() => {
                    match maybe_event {
                        Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                            if self.handle_key(key, identity.as_ref(), &tasks) {
                                return Ok(());
                            }
                        }
                        Some(Ok(_)) => {} // resize etc. — redraw on next pass
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }
                _ = identity_rx.changed() => {
                    // View switch: drop per-view state from the old session.
                    self.sign_in = SignInForm::default();
                    self.list = ListView::default();
                }
                _ = tasks_rx.changed() => {}
                _ = phase_rx.changed() => {}
            }
        }
    }

    // ─── Key handling ────────────────────────────────────────────────────────

    /// Returns `true` when the app should quit.
    fn handle_key(&mut self, key: KeyEvent, identity: Option<&Identity>, tasks: &[Task]) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if key.code == KeyCode::Esc || (ctrl && key.code == KeyCode::Char('c')) {
            return true;
        }

        match identity {
            None => self.handle_sign_in_key(key),
            Some(_) => self.handle_list_key(key, ctrl, tasks),
        }
        false
    }

    fn handle_sign_in_key(&mut self, key: KeyEvent) {
        let field = self.sign_in.field;
        match key.code {
            KeyCode::Tab => {
                self.sign_in.field = match field {
                    SignInField::Email => SignInField::Token,
                    SignInField::Token => SignInField::Email,
                };
            }
            KeyCode::Char(c) => match field {
                SignInField::Email => self.sign_in.email.push(c),
                SignInField::Token => self.sign_in.token.push(c),
            },
            KeyCode::Backspace => {
                match field {
                    SignInField::Email => self.sign_in.email.pop(),
                    SignInField::Token => self.sign_in.token.pop(),
                };
            }
            KeyCode::Enter => match field {
                SignInField::Email => self.submit_email(),
                SignInField::Token => self.submit_token(),
            },
            _ => {}
        }
    }

    fn submit_email(&mut self) {
        let email = self.sign_in.email.trim().to_string();
        if email.is_empty() {
            return;
        }
        let session = self.ctx.session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.sign_in(&email).await {
                warn!(error = %e, "sign-in request failed");
            }
        });
        // Unconditional, matching the provider-agnostic promise we can make:
        // if the address exists, a code is on its way.
        self.sign_in.notice = Some("Check your inbox for the login code.".to_string());
        self.sign_in.field = SignInField::Token;
    }

    fn submit_token(&mut self) {
        let email = self.sign_in.email.trim().to_string();
        let token = self.sign_in.token.trim().to_string();
        if email.is_empty() || token.is_empty() {
            return;
        }
        let session = self.ctx.session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.verify(&email, &token).await {
                warn!(error = %e, "code verification failed");
            }
        });
        self.sign_in.notice = Some("Verifying…".to_string());
        self.sign_in.token.clear();
    }

    fn handle_list_key(&mut self, key: KeyEvent, ctrl: bool, tasks: &[Task]) {
        if ctrl && key.code == KeyCode::Char('l') {
            let session = self.ctx.session.clone();
            tokio::spawn(async move {
                if let Err(e) = session.sign_out().await {
                    warn!(error = %e, "sign-out request failed");
                }
            });
            return;
        }

        match key.code {
            KeyCode::Tab => {
                self.list.focus = match self.list.focus {
                    ListFocus::Input => ListFocus::List,
                    ListFocus::List => ListFocus::Input,
                };
            }
            KeyCode::Up => self.list.selected = self.list.selected.saturating_sub(1),
            KeyCode::Down => {
                self.list.selected = (self.list.selected + 1).min(tasks.len().saturating_sub(1));
            }
            KeyCode::Char(c) if self.list.focus == ListFocus::Input => {
                self.list.input.push(c);
            }
            KeyCode::Backspace if self.list.focus == ListFocus::Input => {
                self.list.input.pop();
            }
            KeyCode::Enter if self.list.focus == ListFocus::Input => {
                // The input clears no matter what becomes of the request.
                let content = std::mem::take(&mut self.list.input);
                let store = self.ctx.store.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.add_task(&content).await {
                        warn!(error = %e, "add task failed");
                    }
                });
            }
            KeyCode::Enter | KeyCode::Char(' ') if self.list.focus == ListFocus::List => {
                if let Some(task) = tasks.get(self.list.selected) {
                    let store = self.ctx.store.clone();
                    let id = task.id.clone();
                    let completed = !task.completed;
                    tokio::spawn(async move {
                        if let Err(e) = store.toggle(&id, completed).await {
                            warn!(error = %e, "toggle task failed");
                        }
                    });
                }
            }
            _ => {}
        }
    }

    // ─── Rendering ───────────────────────────────────────────────────────────

    fn draw_sign_in(&self, frame: &mut Frame) {
        let area = centered_rect(frame.area(), 50, 12);
        let field = self.sign_in.field;

        let active = Style::default().add_modifier(Modifier::BOLD);
        let mut lines = vec![
            Line::from(Span::styled(TITLE, active)).alignment(Alignment::Center),
            Line::from("Sign in to continue").alignment(Alignment::Center),
            Line::default(),
            field_line("Email", &self.sign_in.email, field == SignInField::Email),
            field_line("Code", &self.sign_in.token, field == SignInField::Token),
            Line::default(),
        ];
        if let Some(notice) = &self.sign_in.notice {
            lines.push(
                Line::from(Span::styled(
                    notice.clone(),
                    Style::default().fg(Color::Yellow),
                ))
                .alignment(Alignment::Center),
            );
        }
        lines.push(
            Line::from("Enter submit · Tab switch field · Esc quit")
                .alignment(Alignment::Center),
        );

        let block = Block::default().borders(Borders::ALL).title("Sign in");
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn draw_list(&self, frame: &mut Frame, identity: &Identity, tasks: &[Task], phase: SyncPhase) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(1),
                Constraint::Length(1),
            ])
            .split(frame.area());

        let who = identity.email.as_deref().unwrap_or(&identity.id);
        let header = Paragraph::new(Line::from(vec![
            Span::styled(TITLE, Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  —  "),
            Span::styled(who.to_string(), Style::default().fg(Color::Cyan)),
        ]))
        .block(Block::default().borders(Borders::ALL));
        frame.render_widget(header, chunks[0]);

        let input_focused = self.list.focus == ListFocus::Input;
        let input_style = if input_focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let input_text = if self.list.input.is_empty() && !input_focused {
            Span::styled("Add a new task…", Style::default().fg(Color::DarkGray))
        } else {
            Span::raw(self.list.input.clone())
        };
        let input = Paragraph::new(Line::from(input_text)).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(input_style)
                .title("New task"),
        );
        frame.render_widget(input, chunks[1]);

        match phase {
            SyncPhase::Loading => {
                frame.render_widget(
                    Paragraph::new("Loading…").alignment(Alignment::Center),
                    chunks[2],
                );
            }
            _ => {
                let items: Vec<ListItem> = tasks.iter().map(task_item).collect();
                let mut state = ListState::default();
                if self.list.focus == ListFocus::List && !tasks.is_empty() {
                    state.select(Some(self.list.selected));
                }
                let list = List::new(items)
                    .block(Block::default().borders(Borders::ALL).title("Tasks"))
                    .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
                frame.render_stateful_widget(list, chunks[2], &mut state);
            }
        }

        let footer = Paragraph::new(
            "Tab focus · Enter add · Space toggle · ↑/↓ select · Ctrl-L sign out · Esc quit",
        )
        .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(footer, chunks[3]);
    }
}

fn field_line<'a>(label: &'a str, value: &'a str, active: bool) -> Line<'a> {
    let cursor = if active { "▏" } else { "" };
    let style = if active {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    Line::from(vec![
        Span::styled(format!("{label}: "), style),
        Span::raw(value),
        Span::styled(cursor, Style::default().fg(Color::Yellow)),
    ])
}

fn task_item(task: &Task) -> ListItem<'_> {
    let (marker, style) = if task.completed {
        (
            "[x] ",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::CROSSED_OUT),
        )
    } else {
        ("[ ] ", Style::default())
    };
    ListItem::new(Line::from(vec![
        Span::raw(marker),
        Span::styled(task.content.clone(), style),
    ]))
}

/// A fixed-size rect centered in `area`, clamped to it.
fn centered_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
