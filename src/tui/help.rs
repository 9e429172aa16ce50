use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Run:"),
        key_line("s", 11, "Start / resume"),
        key_line("p", 11, "Pause"),
        key_line("o", 11, "Open the current chat (when it could not open by itself)"),
        key_line("m", 11, "Mark current as sent and move on"),
        key_line("f", 11, "Mark current as failed and move on"),
        key_line("x", 11, "Skip current"),
        key_line("b", 11, "I'm back (for terminals that do not report focus)"),
        key_line("r", 11, "Reset every recipient to pending"),
        key_line("a", 11, "Toggle automatic / manual mode (not while running)"),
        key_line("+/-", 9, "Delay between chats +/- 0.5s"),
        Line::from(""),
        Line::from("Queue:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("j/k", Style::default().fg(Color::Magenta)),
            Span::raw("  Move"),
        ]),
        key_line("Enter", 7, "Continue from the highlighted recipient (while paused)"),
        key_line("space", 7, "Include / exclude the highlighted recipient"),
        key_line("A/N", 9, "Include / exclude everyone"),
        key_line("d", 11, "Remove the highlighted recipient"),
        key_line("y", 11, "Copy the chat link to the clipboard"),
        Line::from(""),
        Line::from("Report tab:"),
        key_line("e", 11, "Export last report as JSON"),
        key_line("c", 11, "Export last report as CSV"),
        Line::from(""),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (saves the campaign)"),
        ]),
        key_line("tab", 9, "Switch tabs"),
        key_line("?", 11, "Show this help"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
