use anyhow::Result;
use crossterm::{
    event::{self, Event as TermEvent, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use realty_portal::{BuyerAccount, BuyerStep, Event, InviteCode, RealtorRoster};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Invites,
    Buyers,
    Activity,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Invites => Page::Buyers,
            Page::Buyers => Page::Activity,
            Page::Activity => Page::Invites,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Invites => Page::Activity,
            Page::Buyers => Page::Invites,
            Page::Activity => Page::Buyers,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Invites => "Pending Invites",
            Page::Buyers => "Buyers",
            Page::Activity => "Activity",
        }
    }
}

/// Realtor dashboard state
pub struct App {
    pub roster: RealtorRoster,
    pub events: Vec<Event>,
    pub current_page: Page,
    pub invites_state: TableState,
    pub buyers_state: TableState,
    pub activity_state: TableState,
    pub show_detail: bool,
}

impl App {
    pub fn new(roster: RealtorRoster, events: Vec<Event>) -> Self {
        let mut app = Self {
            roster,
            events,
            current_page: Page::Buyers,
            invites_state: TableState::default(),
            buyers_state: TableState::default(),
            activity_state: TableState::default(),
            show_detail: false,
        };

        for page in [Page::Invites, Page::Buyers, Page::Activity] {
            if app.len_of(page) > 0 {
                app.state_of(page).select(Some(0));
            }
        }

        app
    }

    fn len_of(&self, page: Page) -> usize {
        match page {
            Page::Invites => self.roster.pending_invites.len(),
            Page::Buyers => self.roster.buyers.len(),
            Page::Activity => self.events.len(),
        }
    }

    fn state_of(&mut self, page: Page) -> &mut TableState {
        match page {
            Page::Invites => &mut self.invites_state,
            Page::Buyers => &mut self.buyers_state,
            Page::Activity => &mut self.activity_state,
        }
    }

    fn selected_index(&self) -> Option<usize> {
        match self.current_page {
            Page::Invites => self.invites_state.selected(),
            Page::Buyers => self.buyers_state.selected(),
            Page::Activity => self.activity_state.selected(),
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_buyer(&self) -> Option<&BuyerAccount> {
        self.buyers_state
            .selected()
            .and_then(|i| self.roster.buyers.get(i))
    }

    pub fn selected_invite(&self) -> Option<&InviteCode> {
        self.invites_state
            .selected()
            .and_then(|i| self.roster.pending_invites.get(i))
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    /// Move the selection on the current page by `delta`, wrapping for
    /// single steps and clamping for page jumps.
    fn move_selection(&mut self, delta: isize, wrap: bool) {
        let page = self.current_page;
        let len = self.len_of(page);
        if len == 0 {
            return;
        }

        let current = self.selected_index().unwrap_or(0) as isize;
        let last = len as isize - 1;
        let target = current + delta;

        let i = if wrap {
            if target > last {
                0
            } else if target < 0 {
                last
            } else {
                target
            }
        } else {
            target.clamp(0, last)
        };

        self.state_of(page).select(Some(i as usize));
    }

    pub fn next(&mut self) {
        self.move_selection(1, true);
    }

    pub fn previous(&mut self) {
        self.move_selection(-1, true);
    }

    pub fn page_down(&mut self) {
        self.move_selection(20, false);
    }

    pub fn page_up(&mut self) {
        self.move_selection(-20, false);
    }

    pub fn first(&mut self) {
        let page = self.current_page;
        if self.len_of(page) > 0 {
            self.state_of(page).select(Some(0));
        }
    }

    pub fn last(&mut self) {
        let page = self.current_page;
        let len = self.len_of(page);
        if len > 0 {
            self.state_of(page).select(Some(len - 1));
        }
    }

    pub fn stats(&self) -> RosterStats {
        let buyers = &self.roster.buyers;
        let finished = buyers.iter().filter(|b| b.is_finished()).count();
        let average_percent = if buyers.is_empty() {
            0
        } else {
            buyers.iter().map(|b| b.progress().percent as usize).sum::<usize>() / buyers.len()
        };

        RosterStats {
            buyers: buyers.len(),
            pending_invites: self.roster.pending_invites.len(),
            finished,
            average_percent,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct RosterStats {
    pub buyers: usize,
    pub pending_invites: usize,
    pub finished: usize,
    pub average_percent: usize,
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let TermEvent::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('1') => app.current_page = Page::Invites,
                KeyCode::Char('2') => app.current_page = Page::Buyers,
                KeyCode::Char('3') => app.current_page = Page::Activity,
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.first(),
                KeyCode::End => app.last(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    let content = if app.show_detail && app.current_page != Page::Activity {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);
        render_detail_panel(f, content_chunks[1], app);
        content_chunks[0]
    } else {
        chunks[1]
    };

    match app.current_page {
        Page::Invites => render_invites(f, content, app),
        Page::Buyers => render_buyers(f, content, app),
        Page::Activity => render_activity(f, content, app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let stats = app.stats();

    let mut tab_spans = vec![Span::styled(
        format!("{}  ", app.roster.realtor.name),
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
    )];

    for (i, page) in [Page::Invites, Page::Buyers, Page::Activity].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Buyers: {}", stats.buyers),
        Style::default().fg(Color::Green),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("Pending: {}", stats.pending_invites),
        Style::default().fg(Color::Yellow),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("Avg progress: {}%", stats.average_percent),
        Style::default().fg(Color::Cyan),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn framed<'a>(table: Table<'a>, title: &'a str) -> Table<'a> {
    table
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(title),
        )
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("→ ")
}

fn render_invites(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.roster.pending_invites.iter().map(|invite| {
        Row::new(vec![
            Cell::from(invite.code.clone()).style(Style::default().fg(Color::Yellow)),
            Cell::from(truncate(&invite.recipient_email, 34)),
            Cell::from(invite.created_at.format("%Y-%m-%d %H:%M").to_string()),
        ])
    });

    let table = Table::new(
        rows,
        [Constraint::Length(10), Constraint::Length(36), Constraint::Length(18)],
    )
    .header(header_row(&["Code", "Sent To", "Created"]));

    f.render_stateful_widget(framed(table, " Pending Invites "), area, &mut app.invites_state);
}

fn render_buyers(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.roster.buyers.iter().map(|buyer| {
        let progress = buyer.progress();
        let color = match progress.percent {
            100 => Color::Green,
            0 => Color::DarkGray,
            _ => Color::Cyan,
        };

        Row::new(vec![
            Cell::from(truncate(&buyer.full_name(), 24)),
            Cell::from(truncate(&buyer.email, 30)),
            Cell::from(format!("{}. {}", progress.current_step, progress.current_title)),
            Cell::from(format!("{:>3}%", progress.percent)).style(Style::default().fg(color)),
            Cell::from(buyer.invite_code.clone()),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(26),
            Constraint::Length(32),
            Constraint::Length(24),
            Constraint::Length(6),
            Constraint::Length(10),
        ],
    )
    .header(header_row(&["Buyer", "Email", "Current Step", "Done", "Code"]));

    f.render_stateful_widget(framed(table, " Buyers "), area, &mut app.buyers_state);
}

fn render_activity(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.events.iter().map(|event| {
        let color = match event.event_type.as_str() {
            "buyer_signed_up" => Color::Green,
            "invite_created" => Color::Yellow,
            "invite_used" | "step_completed" => Color::Cyan,
            "invite_revoked" => Color::Red,
            _ => Color::White,
        };

        Row::new(vec![
            Cell::from(event.timestamp.format("%Y-%m-%d %H:%M").to_string()),
            Cell::from(event.event_type.clone()).style(Style::default().fg(color)),
            Cell::from(truncate(&event.entity_id, 38)),
            Cell::from(truncate(&event.actor, 26)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(18),
            Constraint::Length(18),
            Constraint::Length(40),
            Constraint::Length(28),
        ],
    )
    .header(header_row(&["When", "Event", "Entity", "Actor"]));

    f.render_stateful_widget(framed(table, " Activity "), area, &mut app.activity_state);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let label = Style::default().fg(Color::Yellow);
    let mut lines = Vec::new();

    match app.current_page {
        Page::Buyers => match app.selected_buyer() {
            Some(buyer) => {
                lines.push(Line::from(vec![Span::styled("Name: ", label), Span::raw(buyer.full_name())]));
                lines.push(Line::from(vec![Span::styled("Email: ", label), Span::raw(buyer.email.clone())]));
                lines.push(Line::from(vec![
                    Span::styled("Joined: ", label),
                    Span::raw(buyer.created_at.format("%Y-%m-%d").to_string()),
                ]));
                lines.push(Line::from(""));

                for step in BuyerStep::ALL {
                    let (mark, style) = if buyer.is_step_complete(step) {
                        ("✓", Style::default().fg(Color::Green))
                    } else if step.number() == buyer.current_step {
                        ("→", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
                    } else {
                        ("·", Style::default().fg(Color::DarkGray))
                    };
                    lines.push(Line::from(Span::styled(
                        format!(" {} {}. {}", mark, step.number(), step.title()),
                        style,
                    )));
                }
            }
            None => lines.push(Line::from("No buyer selected")),
        },
        Page::Invites => match app.selected_invite() {
            Some(invite) => {
                lines.push(Line::from(vec![Span::styled("Code: ", label), Span::raw(invite.code.clone())]));
                lines.push(Line::from(vec![
                    Span::styled("Sent to: ", label),
                    Span::raw(invite.recipient_email.clone()),
                ]));
                lines.push(Line::from(vec![
                    Span::styled("Status: ", label),
                    Span::raw(invite.status.as_str()),
                ]));
                lines.push(Line::from(vec![
                    Span::styled("Created: ", label),
                    Span::raw(invite.created_at.to_rfc3339()),
                ]));
            }
            None => lines.push(Line::from("No invite selected")),
        },
        Page::Activity => {}
    }

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Details "),
    );

    f.render_widget(panel, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.selected_index().map(|i| i + 1).unwrap_or(0);
    let total = app.len_of(app.current_page);

    let status_spans = vec![
        Span::styled(format!(" Row: {}/{} ", selected, total), Style::default().fg(Color::Cyan)),
        Span::raw(" | "),
        Span::styled("Enter", Style::default().fg(Color::Yellow)),
        Span::raw(" Details | "),
        Span::styled("Tab/1-3", Style::default().fg(Color::Yellow)),
        Span::raw(" Page | "),
        Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
        Span::raw(" Nav | "),
        Span::styled("PgUp/PgDn", Style::default().fg(Color::Yellow)),
        Span::raw(" Fast | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realty_portal::{BuyerAccount, RealtorAccount};

    fn roster(buyers: usize) -> RealtorRoster {
        let realtor = RealtorAccount::new("Pat Agent".to_string(), "pat@agency.com".to_string());
        let buyers = (0..buyers)
            .map(|i| {
                BuyerAccount::new(
                    format!("Buyer{}", i),
                    "Test".to_string(),
                    format!("b{}@example.com", i),
                    "ABCD1234".to_string(),
                    realtor.id.clone(),
                )
            })
            .collect();

        RealtorRoster {
            realtor,
            buyers,
            pending_invites: Vec::new(),
        }
    }

    #[test]
    fn test_page_cycle() {
        assert_eq!(Page::Invites.next(), Page::Buyers);
        assert_eq!(Page::Activity.next(), Page::Invites);
        assert_eq!(Page::Invites.previous(), Page::Activity);
    }

    #[test]
    fn test_selection_wraps_and_clamps() {
        let mut app = App::new(roster(3), Vec::new());
        assert_eq!(app.buyers_state.selected(), Some(0));

        app.previous();
        assert_eq!(app.buyers_state.selected(), Some(2));
        app.next();
        assert_eq!(app.buyers_state.selected(), Some(0));

        app.page_down();
        assert_eq!(app.buyers_state.selected(), Some(2));
        app.page_up();
        assert_eq!(app.buyers_state.selected(), Some(0));
    }

    #[test]
    fn test_empty_pages_have_no_selection() {
        let mut app = App::new(roster(0), Vec::new());
        app.current_page = Page::Invites;
        app.next();
        app.last();
        assert!(app.invites_state.selected().is_none());
        assert!(app.selected_invite().is_none());
    }

    #[test]
    fn test_stats() {
        let mut roster = roster(2);
        for step in BuyerStep::ALL {
            roster.buyers[0].complete_step(step);
        }

        let app = App::new(roster, Vec::new());
        let stats = app.stats();

        assert_eq!(stats.buyers, 2);
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.average_percent, 50);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-email@example.com", 10), "a-very-...");
    }
}
