use crate::launch::url;
use crate::model::{Recipient, RunConfig, RunPhase, RunReport, RunStatus};
use crate::template;
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};

const MAX_LOG: usize = 200;

pub struct UiState {
    pub tab: usize,
    pub info: String,
    /// Recent info messages, oldest first.
    pub log: Vec<String>,

    pub status: Option<RunStatus>,
    pub countdown: Option<f64>,

    // Table cursor over the full recipient list (selected or not).
    pub highlighted: usize,
    pub scroll_offset: usize,

    pub template: String,
    pub config: RunConfig,
    pub auto_save: bool,
    pub focused: bool,

    pub last_report: Option<RunReport>,
    pub last_exported_path: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            info: String::new(),
            log: Vec::new(),
            status: None,
            countdown: None,
            highlighted: 0,
            scroll_offset: 0,
            template: String::new(),
            config: RunConfig::default(),
            auto_save: true,
            focused: true,
            last_report: None,
            last_exported_path: None,
        }
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let chars_to_take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(chars_to_take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}

impl UiState {
    pub fn push_info(&mut self, msg: String) {
        self.log.push(msg.clone());
        if self.log.len() > MAX_LOG {
            let _ = self.log.drain(0..(self.log.len() - MAX_LOG));
        }
        self.info = msg;
    }

    pub fn apply_status(&mut self, status: RunStatus) {
        if status.phase != RunPhase::Countdown {
            self.countdown = None;
        } else if status.countdown.is_some() {
            self.countdown = status.countdown;
        }
        self.config.inter_delay = status.inter_delay;
        self.config.mode = status.mode;
        let len = status.recipients.len();
        if len == 0 {
            self.highlighted = 0;
        } else if self.highlighted >= len {
            self.highlighted = len - 1;
        }
        self.status = Some(status);
    }

    pub fn recipients(&self) -> &[Recipient] {
        self.status
            .as_ref()
            .map(|s| s.recipients.as_slice())
            .unwrap_or(&[])
    }

    pub fn phase(&self) -> RunPhase {
        self.status.as_ref().map_or(RunPhase::Idle, |s| s.phase)
    }

    pub fn highlighted_recipient(&self) -> Option<&Recipient> {
        self.recipients().get(self.highlighted)
    }

    /// Run position of the highlighted recipient, if it takes part in the run.
    pub fn highlighted_position(&self) -> Option<usize> {
        let list = self.recipients();
        let r = list.get(self.highlighted)?;
        if !r.selected {
            return None;
        }
        Some(list[..self.highlighted].iter().filter(|r| r.selected).count())
    }

    pub fn move_highlight(&mut self, delta: isize, visible_rows: usize) {
        let len = self.recipients().len();
        if len == 0 {
            return;
        }
        let next = (self.highlighted as isize + delta).clamp(0, len as isize - 1);
        self.highlighted = next as usize;
        if self.highlighted < self.scroll_offset {
            self.scroll_offset = self.highlighted;
        } else if visible_rows > 0 && self.highlighted >= self.scroll_offset + visible_rows {
            self.scroll_offset = self.highlighted + 1 - visible_rows;
        }
    }

    /// Chat link for the in-flight recipient, or the highlighted one when idle.
    pub fn link_for_copy(&self) -> Option<(String, String)> {
        let r = self
            .status
            .as_ref()
            .and_then(|s| s.current.as_ref())
            .or_else(|| self.highlighted_recipient())?;
        let number = url::format_number(&r.address, &self.config.country_code);
        if number.is_empty() {
            return None;
        }
        let message = template::render(&self.template, &r.display_name);
        Some((
            r.display_name.clone(),
            url::target_url(&self.config.messaging_host, &number, &message),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunMode;
    use std::time::Duration;

    fn status(recipients: Vec<Recipient>) -> RunStatus {
        RunStatus {
            phase: RunPhase::Paused,
            position: 0,
            total: recipients.iter().filter(|r| r.selected).count(),
            current: None,
            countdown: None,
            inter_delay: Duration::from_secs(3),
            mode: RunMode::Automatic,
            recipients,
        }
    }

    #[test]
    fn highlighted_position_skips_unselected() {
        let mut off = Recipient::new("b", "Bo", "2");
        off.selected = false;
        let mut state = UiState::default();
        state.apply_status(status(vec![
            Recipient::new("a", "Ana", "1"),
            off,
            Recipient::new("c", "Cy", "3"),
        ]));

        state.highlighted = 1;
        assert_eq!(state.highlighted_position(), None);
        state.move_highlight(1, 10);
        assert_eq!(state.highlighted_position(), Some(1));
        state.move_highlight(5, 10);
        assert_eq!(state.highlighted, 2);
    }

    #[test]
    fn copy_link_uses_template_and_country_code() {
        let mut state = UiState {
            template: "Hi {name}".into(),
            ..UiState::default()
        };
        state.config.country_code = "91".into();
        state.apply_status(status(vec![Recipient::new("a", "Ana", "0987654321")]));
        let (name, link) = state.link_for_copy().unwrap();
        assert_eq!(name, "Ana");
        assert_eq!(link, "https://wa.me/91987654321?text=Hi%20Ana");
    }

    #[test]
    fn log_is_bounded() {
        let mut state = UiState::default();
        for i in 0..(MAX_LOG + 5) {
            state.push_info(format!("m{i}"));
        }
        assert_eq!(state.log.len(), MAX_LOG);
        assert_eq!(state.log[0], "m5");
        assert_eq!(state.info, format!("m{}", MAX_LOG + 4));
    }
}
