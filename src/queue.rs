//! Recipient queue.
//!
//! The queue is owned by the application; the run controller only reads the
//! selected sequence and writes statuses, always by recipient id.

use crate::model::{Recipient, SendStatus, StatusCounts};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Queue {
    recipients: Vec<Recipient>,
}

impl Queue {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self { recipients }
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    pub fn into_recipients(self) -> Vec<Recipient> {
        self.recipients
    }

    /// Selected recipients in list order.
    pub fn selected_sequence(&self) -> Vec<&Recipient> {
        self.recipients.iter().filter(|r| r.selected).collect()
    }

    pub fn selected_len(&self) -> usize {
        self.recipients.iter().filter(|r| r.selected).count()
    }

    /// Recipient at `position` of the selected sequence.
    pub fn recipient_at(&self, position: isize) -> Option<&Recipient> {
        let idx = usize::try_from(position).ok()?;
        self.recipients.iter().filter(|r| r.selected).nth(idx)
    }

    pub fn get(&self, id: &str) -> Option<&Recipient> {
        self.recipients.iter().find(|r| r.id == id)
    }

    /// Unknown ids are ignored.
    pub fn set_status(&mut self, id: &str, status: SendStatus) {
        if let Some(r) = self.recipients.iter_mut().find(|r| r.id == id) {
            r.status = status;
        }
    }

    pub fn set_selected(&mut self, id: &str, selected: bool) {
        if let Some(r) = self.recipients.iter_mut().find(|r| r.id == id) {
            r.selected = selected;
        }
    }

    pub fn select_all(&mut self, selected: bool) {
        for r in &mut self.recipients {
            r.selected = selected;
        }
    }

    pub fn push(&mut self, recipient: Recipient) {
        self.recipients.push(recipient);
    }

    pub fn remove(&mut self, id: &str) -> Option<Recipient> {
        let idx = self.recipients.iter().position(|r| r.id == id)?;
        Some(self.recipients.remove(idx))
    }

    pub fn reset_statuses(&mut self) {
        for r in &mut self.recipients {
            r.status = SendStatus::Pending;
        }
    }

    /// Selected recipients, optionally narrowed to one status.
    pub fn filtered(&self, status: Option<SendStatus>) -> Vec<&Recipient> {
        self.recipients
            .iter()
            .filter(|r| r.selected)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect()
    }

    /// Status counts over the selected sequence.
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for r in self.recipients.iter().filter(|r| r.selected) {
            match r.status {
                SendStatus::Pending => counts.pending += 1,
                SendStatus::Sent => counts.sent += 1,
                SendStatus::Failed => counts.failed += 1,
                SendStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}
