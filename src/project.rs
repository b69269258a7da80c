use std::collections::BTreeMap;

use uuid::Uuid;

use crate::canvas::CanvasSnapshot;
use crate::io::{SavedColoringState, story_hash};

/// 1-based page number, stable for a session; key of the snapshot map.
pub type PageId = u32;

/// One scene as delivered by the story splitter: ids start at 1 and increase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scene {
    pub id: PageId,
    pub title: String,
    pub text: String,
    pub summary: String,
}

/// A colouring page.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub id: PageId,
    pub title: String,
    /// Locator of the line-art image (file path or `file://` URL). `None`
    /// until the image generator has produced one.
    pub line_art: Option<String>,
    /// Last exported colouring of this page. Takes priority over `line_art`
    /// when the page is displayed.
    pub colored_snapshot: Option<CanvasSnapshot>,
}

impl Page {
    pub fn new(id: PageId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            line_art: None,
            colored_snapshot: None,
        }
    }

    pub fn with_line_art(mut self, locator: impl Into<String>) -> Self {
        self.line_art = Some(locator.into());
        self
    }

    pub fn is_colored(&self) -> bool {
        self.colored_snapshot.is_some()
    }
}

/// Ordered pages of the active story plus the current selection.
pub struct StorySession {
    id: Uuid,
    story_text: String,
    theme_key: String,
    pages: Vec<Page>,
    selected: Option<PageId>,
}

impl StorySession {
    pub fn new(
        story_text: impl Into<String>,
        theme_key: impl Into<String>,
        pages: Vec<Page>,
    ) -> Self {
        let selected = pages.first().map(|p| p.id);
        Self {
            id: Uuid::new_v4(),
            story_text: story_text.into(),
            theme_key: theme_key.into(),
            pages,
            selected,
        }
    }

    /// Build pages from splitter output. Ids are taken as given.
    pub fn from_scenes(
        story_text: impl Into<String>,
        theme_key: impl Into<String>,
        scenes: &[Scene],
    ) -> Self {
        let pages = scenes.iter().map(|s| Page::new(s.id, s.title.clone())).collect();
        Self::new(story_text, theme_key, pages)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Short tag that tells sessions apart in the log.
    pub fn log_tag(&self) -> String {
        let simple = self.id.simple().to_string();
        format!("session {}", &simple[..8])
    }

    pub fn story_text(&self) -> &str {
        &self.story_text
    }

    pub fn theme_key(&self) -> &str {
        &self.theme_key
    }

    /// Persistence key of this story + theme.
    pub fn story_hash(&self) -> String {
        story_hash(&self.story_text, &self.theme_key)
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, id: PageId) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == id)
    }

    fn page_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| p.id == id)
    }

    /// Select a page. Unknown ids leave the selection unchanged.
    pub fn select_page(&mut self, id: PageId) -> bool {
        if self.page(id).is_some() {
            self.selected = Some(id);
            true
        } else {
            false
        }
    }

    pub fn selected_id(&self) -> Option<PageId> {
        self.selected
    }

    pub fn selected_page(&self) -> Option<&Page> {
        self.selected.and_then(|id| self.page(id))
    }

    pub fn set_line_art(&mut self, id: PageId, locator: impl Into<String>) -> bool {
        match self.page_mut(id) {
            Some(page) => {
                page.line_art = Some(locator.into());
                true
            }
            None => false,
        }
    }

    /// Store a freshly exported snapshot on its page, replacing any older one.
    pub fn apply_snapshot(&mut self, page_id: PageId, snapshot: CanvasSnapshot) -> bool {
        match self.page_mut(page_id) {
            Some(page) => {
                page.colored_snapshot = Some(snapshot);
                true
            }
            None => false,
        }
    }

    /// Forget a page's colouring; its next load redraws the raw line art.
    pub fn clear_snapshot(&mut self, page_id: PageId) -> Option<CanvasSnapshot> {
        self.page_mut(page_id).and_then(|p| p.colored_snapshot.take())
    }

    /// Apply every saved snapshot whose page exists in this session.
    /// Returns how many pages were updated.
    pub fn merge_saved(&mut self, saved: &SavedColoringState) -> usize {
        let mut applied = 0;
        for (id, snapshot) in &saved.images {
            if self.apply_snapshot(*id, snapshot.clone()) {
                applied += 1;
            }
        }
        log_info!(
            "{}: restored {} of {} saved page(s)",
            self.log_tag(),
            applied,
            saved.images.len()
        );
        applied
    }

    /// Snapshot map as persisted: one entry per coloured page.
    pub fn snapshots(&self) -> BTreeMap<PageId, CanvasSnapshot> {
        self.pages
            .iter()
            .filter_map(|p| p.colored_snapshot.clone().map(|s| (p.id, s)))
            .collect()
    }
}
